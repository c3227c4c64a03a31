use regex::Regex;

use crate::error::{Error, Result};

/// How a `{{...}}` token is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// `{{name}}`: one value.
    Scalar,
    /// `{{#array.field}}`: `array` names a data sequence, `field` a dotted
    /// path into each element.
    LegacyArray { array: String, field: String },
    /// `{{##section.table.cell}}`: the sequence lives at
    /// `data[section][table]` (or `data[table]` for older payload shapes).
    SectionTable {
        section: String,
        table: String,
        cell: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// The literal token, braces included.
    pub token: String,
    /// The key between the braces, whitespace-trimmed.
    pub key: String,
    /// Occurrences across the shared-string pool.
    pub count: u32,
    pub kind: PlaceholderKind,
}

impl Placeholder {
    pub fn is_table(&self) -> bool {
        !matches!(self.kind, PlaceholderKind::Scalar)
    }
}

fn token_pattern() -> Regex {
    Regex::new(r"\{\{([^}]+)\}\}").unwrap()
}

/// Scans pool text for `{{...}}` tokens. First `}}` wins, nesting is not a
/// thing. Deduplicated by literal token, first-appearance order, with
/// occurrence counts.
pub fn scan_tokens(text: &str) -> Vec<Placeholder> {
    let re = token_pattern();
    let mut found: Vec<Placeholder> = Vec::new();
    for caps in re.captures_iter(text) {
        let token = &caps[0];
        if let Some(existing) = found.iter_mut().find(|p| p.token == token) {
            existing.count += 1;
            continue;
        }
        let key = caps[1].trim().to_owned();
        let kind = classify(&key);
        found.push(Placeholder {
            token: token.to_owned(),
            key,
            count: 1,
            kind,
        });
    }
    found
}

/// Keys starting with exactly one `#` and holding at least one dot are
/// legacy arrays; `##` with at least two dots is section-table; anything
/// else is a scalar.
fn classify(key: &str) -> PlaceholderKind {
    if let Some(rest) = key.strip_prefix("##") {
        let mut parts = rest.splitn(3, '.');
        if let (Some(section), Some(table), Some(cell)) =
            (parts.next(), parts.next(), parts.next())
        {
            return PlaceholderKind::SectionTable {
                section: section.to_owned(),
                table: table.to_owned(),
                cell: cell.to_owned(),
            };
        }
        return PlaceholderKind::Scalar;
    }
    if let Some(rest) = key.strip_prefix('#') {
        if let Some((array, field)) = rest.split_once('.') {
            return PlaceholderKind::LegacyArray {
                array: array.to_owned(),
                field: field.to_owned(),
            };
        }
    }
    PlaceholderKind::Scalar
}

/// A template may use legacy-array or section-table syntax, never both.
pub fn ensure_single_syntax(placeholders: &[Placeholder]) -> Result<()> {
    let legacy = placeholders
        .iter()
        .any(|p| matches!(p.kind, PlaceholderKind::LegacyArray { .. }));
    let sectioned = placeholders
        .iter()
        .any(|p| matches!(p.kind, PlaceholderKind::SectionTable { .. }));
    if legacy && sectioned {
        return Err(Error::MixedPlaceholderSyntax);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_three_syntaxes() {
        let found = scan_tokens("{{会社名}} {{#明細.番号}} {{##請求.明細.単価}} {{会社名}}");
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].count, 2);
        assert_eq!(found[0].kind, PlaceholderKind::Scalar);
        assert_eq!(
            found[1].kind,
            PlaceholderKind::LegacyArray {
                array: "明細".into(),
                field: "番号".into()
            }
        );
        assert_eq!(
            found[2].kind,
            PlaceholderKind::SectionTable {
                section: "請求".into(),
                table: "明細".into(),
                cell: "単価".into()
            }
        );
    }

    #[test]
    fn underspecified_hash_keys_fall_back_to_scalar() {
        let found = scan_tokens("{{#noDot}} {{##one.dot}}");
        assert!(found.iter().all(|p| p.kind == PlaceholderKind::Scalar));
    }

    #[test]
    fn mixing_syntaxes_is_refused() {
        let found = scan_tokens("{{#a.b}} {{##s.t.c}}");
        assert!(matches!(
            ensure_single_syntax(&found),
            Err(Error::MixedPlaceholderSyntax)
        ));
    }

    #[test]
    fn first_close_wins() {
        let found = scan_tokens("{{a}}}}");
        assert_eq!(found[0].token, "{{a}}");
    }
}
