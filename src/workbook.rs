use regex::Regex;

use crate::error::{Error, Result};

pub const WORKBOOK_PART: &str = "xl/workbook.xml";
pub const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const WORKSHEET_PREFIX: &str = "xl/worksheets/sheet";

/// One `<sheet/>` record from the workbook manifest. `raw` keeps the literal
/// tag so a retained sheet can be spliced back byte-for-byte.
#[derive(Debug, Clone)]
pub struct SheetEntry {
    pub raw: String,
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    /// 0-based manifest position; `localSheetId` scoping refers to this.
    pub index: usize,
}

/// Selects a worksheet by display name or by its stable `sheetId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    Name(String),
    Id(u32),
}

impl std::fmt::Display for SheetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetSelector::Name(n) => write!(f, "name={n}"),
            SheetSelector::Id(id) => write!(f, "id={id}"),
        }
    }
}

/// Value of `name` inside a raw tag, e.g. `tag_attr(tag, "r:id")`.
pub fn tag_attr(tag: &str, name: &str) -> Option<String> {
    let escaped = regex::escape(name);
    let re = Regex::new(&format!(r#"\b{escaped}="([^"]*)""#)).ok()?;
    re.captures(tag).map(|c| c[1].to_owned())
}

pub fn parse_sheets(workbook_xml: &str) -> Result<Vec<SheetEntry>> {
    let sheets_re = Regex::new(r"(?s)<sheets>(.*?)</sheets>").unwrap();
    let section = sheets_re
        .captures(workbook_xml)
        .map(|c| c[1].to_owned())
        .ok_or_else(|| Error::malformed(WORKBOOK_PART, "<sheets> not found"))?;

    let tag_re = Regex::new(r"<sheet\b[^>]*/>").unwrap();
    let mut out = Vec::new();
    for (index, m) in tag_re.find_iter(&section).enumerate() {
        let raw = m.as_str();
        let (name, sheet_id, rel_id) = match (
            tag_attr(raw, "name"),
            tag_attr(raw, "sheetId"),
            tag_attr(raw, "r:id"),
        ) {
            (Some(n), Some(s), Some(r)) => (n, s, r),
            _ => continue,
        };
        out.push(SheetEntry {
            raw: raw.to_owned(),
            name,
            sheet_id: sheet_id.parse().unwrap_or(0),
            rel_id,
            index,
        });
    }
    Ok(out)
}

pub fn resolve_selector<'a>(
    sheets: &'a [SheetEntry],
    selector: &SheetSelector,
) -> Result<&'a SheetEntry> {
    let found = match selector {
        SheetSelector::Id(id) => sheets.iter().find(|s| s.sheet_id == *id),
        SheetSelector::Name(name) => sheets.iter().find(|s| &s.name == name),
    };
    found.ok_or_else(|| Error::SheetNotFound(selector.to_string()))
}

/// Resolves a worksheet relationship id to its archive part path.
pub fn worksheet_target(rels_xml: &str, rel_id: &str) -> Option<String> {
    let tag_re = Regex::new(r"<Relationship\b[^>]*/>").unwrap();
    for m in tag_re.find_iter(rels_xml) {
        let raw = m.as_str();
        if tag_attr(raw, "Id").as_deref() != Some(rel_id) {
            continue;
        }
        return tag_attr(raw, "Target").map(|t| normalize_target(&t));
    }
    None
}

fn normalize_target(target: &str) -> String {
    if let Some(rooted) = target.strip_prefix('/') {
        rooted.to_owned()
    } else if target.starts_with("xl/") {
        target.to_owned()
    } else {
        format!("xl/{}", target.trim_start_matches('/'))
    }
}

/// Sheet entry whose worksheet part is `path`, if any.
pub fn sheet_for_part<'a>(
    sheets: &'a [SheetEntry],
    rels_xml: &str,
    path: &str,
) -> Option<&'a SheetEntry> {
    sheets
        .iter()
        .find(|s| worksheet_target(rels_xml, &s.rel_id).as_deref() == Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WB: &str = concat!(
        r#"<workbook><sheets>"#,
        r#"<sheet name="請求書" sheetId="1" r:id="rId1"/>"#,
        r#"<sheet name="控え" sheetId="2" r:id="rId2"/>"#,
        r#"</sheets></workbook>"#
    );
    const RELS: &str = concat!(
        r#"<Relationships>"#,
        r#"<Relationship Id="rId1" Type=".../worksheet" Target="worksheets/sheet1.xml"/>"#,
        r#"<Relationship Id="rId2" Type=".../worksheet" Target="/xl/worksheets/sheet2.xml"/>"#,
        r#"</Relationships>"#
    );

    #[test]
    fn parses_manifest_entries() {
        let sheets = parse_sheets(WB).unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[1].name, "控え");
        assert_eq!(sheets[1].sheet_id, 2);
        assert_eq!(sheets[1].index, 1);
    }

    #[test]
    fn selector_resolution() {
        let sheets = parse_sheets(WB).unwrap();
        assert_eq!(
            resolve_selector(&sheets, &SheetSelector::Id(2)).unwrap().name,
            "控え"
        );
        assert!(matches!(
            resolve_selector(&sheets, &SheetSelector::Name("なし".into())),
            Err(Error::SheetNotFound(_))
        ));
    }

    #[test]
    fn rel_targets_are_normalized() {
        assert_eq!(
            worksheet_target(RELS, "rId1").as_deref(),
            Some("xl/worksheets/sheet1.xml")
        );
        assert_eq!(
            worksheet_target(RELS, "rId2").as_deref(),
            Some("xl/worksheets/sheet2.xml")
        );
    }
}
