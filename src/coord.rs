use regex::Regex;

use crate::error::{Error, Result};

/// A single cell position. Columns are 0-based internally, rows keep the
/// 1-based numbering of the file format. Parsing and formatting happen only
/// at the part boundary; all shifting logic works on the integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub col: u32,
    pub row: u32,
}

impl CellRef {
    pub fn parse(s: &str) -> Result<Self> {
        let digits = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| bad_ref(s))?;
        if digits == 0 {
            return Err(bad_ref(s));
        }
        let (letters, row) = s.split_at(digits);
        if !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(bad_ref(s));
        }
        Ok(Self {
            col: letters_to_col(letters),
            row: row.parse().map_err(|_| bad_ref(s))?,
        })
    }

    pub fn format(&self) -> String {
        format!("{}{}", col_to_letters(self.col), self.row)
    }
}

fn bad_ref(s: &str) -> Error {
    Error::malformed("cell reference", format!("cannot parse `{s}`"))
}

/// A rectangular range, as used by `<mergeCell ref="A1:B2"/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn parse(s: &str) -> Result<Self> {
        let (a, b) = s
            .split_once(':')
            .ok_or_else(|| Error::malformed("cell range", format!("cannot parse `{s}`")))?;
        Ok(Self {
            start: CellRef::parse(a)?,
            end: CellRef::parse(b)?,
        })
    }

    pub fn format(&self) -> String {
        format!("{}:{}", self.start.format(), self.end.format())
    }

    pub fn shifted_rows(&self, by: u32) -> Self {
        Self {
            start: CellRef { row: self.start.row + by, ..self.start },
            end: CellRef { row: self.end.row + by, ..self.end },
        }
    }
}

/// 0-based column index to letters: 0 -> "A", 26 -> "AA".
pub fn col_to_letters(mut idx: u32) -> String {
    let mut s = String::new();
    loop {
        let rem = idx % 26;
        s.insert(0, (b'A' + rem as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    s
}

/// Letters to 0-based column index: "A" -> 0, "AA" -> 26.
pub fn letters_to_col(s: &str) -> u32 {
    s.bytes().fold(0u32, |acc, b| {
        acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32
    }) - 1
}

/// Shifts the row component of every relative A1 reference in a formula by
/// `by` rows. `$`-anchored rows stay put, column anchors pass through, and a
/// letter-digit run followed by `(` is a function name, not a reference.
pub fn shift_formula_rows(formula: &str, by: u32) -> String {
    let re = a1_reference_pattern();
    let mut out = String::with_capacity(formula.len() + 8);
    let mut last = 0;
    for m in re.captures_iter(formula) {
        let whole = m.get(0).unwrap();
        out.push_str(&formula[last..whole.start()]);
        last = whole.end();

        let preceded = formula[..whole.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
        let followed_by_call = formula[whole.end()..].starts_with('(');
        let row_anchor = !m[3].is_empty();

        if preceded || followed_by_call || row_anchor {
            out.push_str(whole.as_str());
            continue;
        }
        let row: u32 = m[4].parse().unwrap_or(0);
        out.push_str(&m[1]);
        out.push_str(&m[2]);
        out.push_str(&(row + by).to_string());
    }
    out.push_str(&formula[last..]);
    out
}

fn a1_reference_pattern() -> Regex {
    Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)").unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ref_round_trip() {
        for s in ["A1", "Z99", "AA10", "AMJ1048576"] {
            assert_eq!(CellRef::parse(s).unwrap().format(), s);
        }
        assert!(CellRef::parse("12").is_err());
        assert!(CellRef::parse("A").is_err());
    }

    #[test]
    fn column_letters_round_trip() {
        for idx in [0, 25, 26, 51, 701, 702, 16383] {
            assert_eq!(letters_to_col(&col_to_letters(idx)), idx);
        }
    }

    #[test]
    fn formula_shift_respects_anchors() {
        assert_eq!(shift_formula_rows("SUM(A10:C10)", 3), "SUM(A13:C13)");
        assert_eq!(shift_formula_rows("A$10+$B10", 3), "A$10+$B13");
        assert_eq!(shift_formula_rows("LOG10(B2)", 1), "LOG10(B3)");
        assert_eq!(shift_formula_rows("1+2", 5), "1+2");
    }
}
