use std::collections::{BTreeSet, HashSet};

use regex::Regex;

use crate::archive::Archive;
use crate::coord::{CellRange, CellRef, shift_formula_rows};
use crate::error::{Error, Result};

/// One worksheet part, parsed far enough to do row surgery: structural rows
/// and cells plus the merge list. Everything outside `<sheetData>` and
/// `<mergeCells>` is carried verbatim.
pub struct Worksheet {
    pub path: String,
    xml: String,
    pub rows: Vec<Row>,
    pub merges: Vec<CellRange>,
    modified: bool,
}

/// A `<row>` element. Attributes other than `r` ride along untouched.
#[derive(Debug, Clone)]
pub struct Row {
    pub num: u32,
    attrs: String,
    pub cells: Vec<Cell>,
}

/// A `<c>` element. The row component of its reference is owned by the row;
/// only the column index is stored here.
#[derive(Debug, Clone)]
pub struct Cell {
    pub col: u32,
    attrs: String,
    pub is_shared: bool,
    /// `<f>` attributes and text, raw.
    pub formula: Option<(String, String)>,
    /// `<v>` text, raw.
    pub value: Option<String>,
    /// Any other children (`<is>`, `<extLst>`, ...), raw.
    extra: String,
}

impl Worksheet {
    pub fn parse(path: &str, xml: String) -> Result<Self> {
        let (sd_start, sd_end) = sheet_data_span(path, &xml)?;
        let rows = parse_rows(path, &xml[sd_start..sd_end])?;
        let merges = parse_merges(&xml)?;
        Ok(Self {
            path: path.to_owned(),
            xml,
            rows,
            merges,
            modified: false,
        })
    }

    pub fn load(archive: &Archive, path: &str) -> Result<Self> {
        let xml = archive.require_text(path)?;
        Self::parse(path, xml)
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn row(&self, num: u32) -> Option<&Row> {
        self.rows.iter().find(|r| r.num == num)
    }

    /// Row numbers whose cells reference any of the given shared-string
    /// indices.
    pub fn rows_referencing(&self, indices: &HashSet<u32>) -> BTreeSet<u32> {
        let mut out = BTreeSet::new();
        for row in &self.rows {
            for cell in &row.cells {
                if cell.is_shared
                    && let Some(v) = cell.shared_index()
                    && indices.contains(&v)
                {
                    out.insert(row.num);
                }
            }
        }
        out
    }

    /// Shifts every row at or below `from` downward by `by` rows. Structural,
    /// so no renumbering collision is possible.
    pub fn shift_rows_from(&mut self, from: u32, by: u32) {
        for row in &mut self.rows {
            if row.num >= from {
                row.num += by;
            }
        }
        self.modified = true;
    }

    /// Shifts merge range endpoints that sit at or below `from`.
    pub fn shift_merges_from(&mut self, from: u32, by: u32) {
        for merge in &mut self.merges {
            if merge.start.row >= from {
                merge.start.row += by;
            }
            if merge.end.row >= from {
                merge.end.row += by;
            }
        }
        self.modified = true;
    }

    /// Clones the template row-group `[start, end]` `repeat` times, placing
    /// copy `k` (1-based) at `start + k*height`. Relative formula rows shift
    /// with the copy. Call after [`Worksheet::shift_rows_from`] has opened
    /// the gap.
    pub fn clone_template_block(&mut self, start: u32, end: u32, repeat: u32) -> Result<()> {
        let height = end - start + 1;
        let mut template: Vec<Row> = Vec::with_capacity(height as usize);
        for num in start..=end {
            let row = self.row(num).ok_or_else(|| Error::TemplateRowMissing {
                sheet: self.path.clone(),
                row: num,
            })?;
            template.push(row.clone());
        }
        for k in 1..=repeat {
            let shift = k * height;
            for row in &template {
                let mut cloned = row.clone();
                cloned.num = row.num + shift;
                for cell in &mut cloned.cells {
                    if let Some((_, text)) = &mut cell.formula {
                        *text = shift_formula_rows(text, shift);
                    }
                }
                self.rows.push(cloned);
            }
        }
        self.rows.sort_by_key(|r| r.num);
        self.modified = true;
        Ok(())
    }

    /// Replicates merge ranges lying entirely inside the template block,
    /// once per repetition.
    pub fn clone_block_merges(&mut self, start: u32, end: u32, repeat: u32) {
        let height = end - start + 1;
        let within: Vec<CellRange> = self
            .merges
            .iter()
            .filter(|m| m.start.row >= start && m.end.row <= end)
            .copied()
            .collect();
        for k in 1..=repeat {
            for merge in &within {
                self.merges.push(merge.shifted_rows(k * height));
            }
        }
        if repeat > 0 && !within.is_empty() {
            self.modified = true;
        }
    }

    /// Points the shared-string cells of one row from `old_index` to
    /// `new_index`.
    pub fn rewrite_shared_index(&mut self, row_num: u32, old_index: u32, new_index: u32) -> Result<()> {
        let path = self.path.clone();
        let row = self
            .rows
            .iter_mut()
            .find(|r| r.num == row_num)
            .ok_or(Error::TemplateRowMissing { sheet: path, row: row_num })?;
        for cell in &mut row.cells {
            if cell.is_shared && cell.shared_index() == Some(old_index) {
                cell.value = Some(new_index.to_string());
            }
        }
        self.modified = true;
        Ok(())
    }

    /// Serializes the sheet back into part text and stores it.
    pub fn store(&self, archive: &mut Archive) -> Result<()> {
        archive.put_part(&self.path, self.render()?);
        Ok(())
    }

    pub fn render(&self) -> Result<String> {
        let (sd_start, sd_end) = sheet_data_span(&self.path, &self.xml)?;
        let mut body = String::new();
        for row in &self.rows {
            row.render_into(&mut body);
        }
        let mut out = String::with_capacity(self.xml.len() + body.len());
        out.push_str(&self.xml[..sd_start]);
        out.push_str(&body);
        out.push_str(&self.xml[sd_end..]);

        let merge_re = Regex::new(r"(?s)<mergeCells\b[^>]*>.*?</mergeCells>").unwrap();
        if let Some(range) = merge_re.find(&out).map(|m| m.range()) {
            let mut block = format!(r#"<mergeCells count="{}">"#, self.merges.len());
            for merge in &self.merges {
                block.push_str(&format!(r#"<mergeCell ref="{}"/>"#, merge.format()));
            }
            block.push_str("</mergeCells>");
            out.replace_range(range, &block);
        }
        Ok(out)
    }
}

impl Cell {
    pub fn shared_index(&self) -> Option<u32> {
        self.value.as_deref().and_then(|v| v.trim().parse().ok())
    }
}

impl Row {
    fn render_into(&self, out: &mut String) {
        out.push_str(&format!(r#"<row r="{}"{}>"#, self.num, self.attrs));
        for cell in &self.cells {
            let cell_ref = CellRef { col: cell.col, row: self.num }.format();
            let empty = cell.formula.is_none() && cell.value.is_none() && cell.extra.is_empty();
            if empty {
                out.push_str(&format!(r#"<c r="{}"{}/>"#, cell_ref, cell.attrs));
                continue;
            }
            out.push_str(&format!(r#"<c r="{}"{}>"#, cell_ref, cell.attrs));
            if let Some((attrs, text)) = &cell.formula {
                out.push_str(&format!("<f{attrs}>{text}</f>"));
            }
            if let Some(v) = &cell.value {
                out.push_str(&format!("<v>{v}</v>"));
            }
            out.push_str(&cell.extra);
            out.push_str("</c>");
        }
        out.push_str("</row>");
    }
}

/// Span of the content between `<sheetData>` and `</sheetData>`.
fn sheet_data_span(part: &str, xml: &str) -> Result<(usize, usize)> {
    if let Some(open) = memchr::memmem::find(xml.as_bytes(), b"<sheetData>") {
        let start = open + "<sheetData>".len();
        let end = memchr::memmem::rfind(xml.as_bytes(), b"</sheetData>")
            .ok_or_else(|| Error::malformed(part, "</sheetData> not found"))?;
        return Ok((start, end));
    }
    if let Some(open) = memchr::memmem::find(xml.as_bytes(), b"<sheetData/>") {
        // empty sheet; content span is zero-width inside the tag
        let mid = open + "<sheetData".len();
        return Ok((mid, mid));
    }
    Err(Error::malformed(part, "<sheetData> not found"))
}

fn strip_ref_attr(attrs: &str) -> String {
    let re = Regex::new(r#"\s*\br="[^"]*""#).unwrap();
    re.replace(attrs, "").into_owned()
}

fn attr<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let re = Regex::new(&format!(r#"\b{name}="([^"]*)""#)).unwrap();
    re.captures(attrs).map(|c| c.get(1).unwrap().as_str())
}

fn parse_rows(part: &str, sheet_data: &str) -> Result<Vec<Row>> {
    let row_re = Regex::new(r"(?s)<row\b([^>]*?)(?:/>|>(.*?)</row>)").unwrap();
    let mut rows = Vec::new();
    for caps in row_re.captures_iter(sheet_data) {
        let attrs_raw = caps.get(1).map_or("", |m| m.as_str());
        let num: u32 = attr(attrs_raw, "r")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::malformed(part, "<row> without r attribute"))?;
        let body = caps.get(2).map_or("", |m| m.as_str());
        rows.push(Row {
            num,
            attrs: strip_ref_attr(attrs_raw),
            cells: parse_cells(part, body)?,
        });
    }
    rows.sort_by_key(|r| r.num);
    Ok(rows)
}

fn parse_cells(part: &str, row_body: &str) -> Result<Vec<Cell>> {
    let cell_re = Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").unwrap();
    let f_re = Regex::new(r"(?s)<f\b([^>]*?)(?:/>|>(.*?)</f>)").unwrap();
    let v_re = Regex::new(r"(?s)<v[^>]*>(.*?)</v>").unwrap();

    let mut cells = Vec::new();
    for caps in cell_re.captures_iter(row_body) {
        let attrs_raw = caps.get(1).map_or("", |m| m.as_str());
        let cell_ref = attr(attrs_raw, "r")
            .ok_or_else(|| Error::malformed(part, "<c> without r attribute"))?;
        let parsed = CellRef::parse(cell_ref)?;
        let body = caps.get(2).map_or("", |m| m.as_str());

        let formula = f_re.captures(body).map(|f| {
            (
                f.get(1).map_or("", |m| m.as_str()).to_owned(),
                f.get(2).map_or("", |m| m.as_str()).to_owned(),
            )
        });
        let value = v_re.captures(body).map(|v| v[1].to_owned());
        let mut extra = body.to_owned();
        if let Some(f) = f_re.find(body) {
            extra = extra.replacen(f.as_str(), "", 1);
        }
        if let Some(v) = v_re.find(body) {
            extra = extra.replacen(v.as_str(), "", 1);
        }

        cells.push(Cell {
            col: parsed.col,
            attrs: strip_ref_attr(attrs_raw),
            is_shared: attr(attrs_raw, "t") == Some("s"),
            formula,
            value,
            extra,
        });
    }
    Ok(cells)
}

fn parse_merges(xml: &str) -> Result<Vec<CellRange>> {
    let re = Regex::new(r#"<mergeCell ref="([^"]+)"/>"#).unwrap();
    let mut merges = Vec::new();
    for caps in re.captures_iter(xml) {
        merges.push(CellRange::parse(&caps[1])?);
    }
    Ok(merges)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = concat!(
        r#"<?xml version="1.0"?><worksheet>"#,
        r#"<dimension ref="A1:B3"/>"#,
        r#"<sheetData>"#,
        r#"<row r="1" ht="20" customHeight="1"><c r="A1" t="s"><v>0</v></c><c r="B1" s="2"/></row>"#,
        r#"<row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2"><f>SUM(B1:B1)</f><v>0</v></c></row>"#,
        r#"<row r="3"><c r="A3" t="s"><v>2</v></c></row>"#,
        r#"</sheetData>"#,
        r#"<mergeCells count="1"><mergeCell ref="A3:B3"/></mergeCells>"#,
        r#"<pageMargins left="0.7"/></worksheet>"#
    );

    fn sheet() -> Worksheet {
        Worksheet::parse("xl/worksheets/sheet1.xml", SHEET.to_owned()).unwrap()
    }

    #[test]
    fn parse_and_render_round_trips_rows() {
        let ws = sheet();
        assert_eq!(ws.rows.len(), 3);
        assert_eq!(ws.rows[0].num, 1);
        assert_eq!(ws.rows[0].cells.len(), 2);
        assert!(ws.rows[0].cells[0].is_shared);
        let rendered = ws.render().unwrap();
        assert!(rendered.contains(r#"<row r="1" ht="20" customHeight="1">"#));
        assert!(rendered.contains(r#"<c r="B1" s="2"/>"#));
        assert!(rendered.contains(r#"<f>SUM(B1:B1)</f>"#));
        assert!(rendered.contains(r#"<pageMargins left="0.7"/>"#));
    }

    #[test]
    fn shifting_renumbers_rows_and_merges() {
        let mut ws = sheet();
        ws.shift_rows_from(3, 4);
        ws.shift_merges_from(3, 4);
        assert_eq!(ws.rows[2].num, 7);
        assert_eq!(ws.merges[0].format(), "A7:B7");
        let rendered = ws.render().unwrap();
        assert!(rendered.contains(r#"<c r="A7" t="s">"#));
    }

    #[test]
    fn cloning_shifts_relative_formulas() {
        let mut ws = sheet();
        ws.shift_rows_from(3, 2);
        ws.clone_template_block(2, 2, 2).unwrap();
        let nums: Vec<u32> = ws.rows.iter().map(|r| r.num).collect();
        assert_eq!(nums, vec![1, 2, 3, 4, 5]);
        let rendered = ws.render().unwrap();
        assert!(rendered.contains("SUM(B2:B2)"));
        assert!(rendered.contains("SUM(B3:B3)"));
    }
}
