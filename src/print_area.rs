use std::collections::BTreeMap;

use log::debug;
use regex::Regex;

use crate::archive::Archive;
use crate::error::Result;
use crate::workbook::{self, WORKBOOK_PART, WORKBOOK_RELS_PART};

/// Rewrites `Print_Area` defined names on sheets that grew, tiling the
/// original page range downward until the inserted rows are covered. Sheets
/// without a print area are left alone; paging is best effort, never an
/// error.
pub fn repaginate(archive: &mut Archive, inserted: &BTreeMap<String, u32>) -> Result<()> {
    let mut workbook_xml = archive.require_text(WORKBOOK_PART)?;
    let rels_xml = archive.require_text(WORKBOOK_RELS_PART)?;
    let sheets = workbook::parse_sheets(&workbook_xml)?;

    let mut touched = false;
    for (sheet_path, grown) in inserted {
        if *grown == 0 {
            continue;
        }
        let Some(entry) = workbook::sheet_for_part(&sheets, &rels_xml, sheet_path) else {
            continue;
        };
        if let Some(updated) = repaginate_sheet(&workbook_xml, entry.index, &entry.name, *grown) {
            workbook_xml = updated;
            touched = true;
        }
    }
    if touched {
        archive.put_part(WORKBOOK_PART, workbook_xml);
    }
    Ok(())
}

fn print_area_pattern() -> Regex {
    Regex::new(r#"(?s)<definedName\b[^>]*name="_xlnm\.Print_Area"[^>]*>([^<]*)</definedName>"#)
        .unwrap()
}

fn repaginate_sheet(
    workbook_xml: &str,
    sheet_index: usize,
    sheet_name: &str,
    inserted_rows: u32,
) -> Option<String> {
    let re = print_area_pattern();
    let (value_range, value) = re.captures_iter(workbook_xml).find_map(|caps| {
        let whole = caps.get(0).unwrap();
        let value = caps.get(1).unwrap();
        scoped_to(whole.as_str(), value.as_str(), sheet_index, sheet_name)
            .then(|| (value.range(), value.as_str().to_owned()))
    })?;

    let first = value.split(',').next()?;
    let bang = first.find('!')?;
    let (sheet_prefix, range_part) = (&first[..bang], &first[bang + 1..]);

    let range_re = Regex::new(r"\$([A-Z]+)\$(\d+):\$([A-Z]+)\$(\d+)").unwrap();
    let caps = range_re.captures(range_part)?;
    let (start_col, end_col) = (&caps[1], &caps[3]);
    let start_row: u32 = caps[2].parse().ok()?;
    let end_row: u32 = caps[4].parse().ok()?;
    if end_row < start_row {
        return None;
    }

    let page_height = end_row - start_row + 1;
    let rows_needed = page_height + inserted_rows;
    let pages = rows_needed.div_ceil(page_height);
    let current_pages = value.split(',').count() as u32;
    if pages <= 1 || pages <= current_pages {
        return None;
    }

    let mut ranges = Vec::with_capacity(pages as usize);
    for page in 0..pages {
        let page_start = start_row + page * page_height;
        let page_end = page_start + page_height - 1;
        ranges.push(format!(
            "{sheet_prefix}!${start_col}${page_start}:${end_col}${page_end}"
        ));
    }
    debug!("print area on sheet `{sheet_name}` repaged to {pages} ranges");

    let mut out = workbook_xml.to_owned();
    out.replace_range(value_range, &ranges.join(","));
    Some(out)
}

/// A print area belongs to the sheet when its `localSheetId` matches the
/// manifest index or the first range's sheet prefix names the sheet.
fn scoped_to(tag: &str, value: &str, sheet_index: usize, sheet_name: &str) -> bool {
    if let Some(local) = workbook::tag_attr(tag, "localSheetId") {
        return local.parse::<usize>().ok() == Some(sheet_index);
    }
    let prefix = value.split('!').next().unwrap_or("");
    let bare = prefix
        .trim_start_matches("&apos;")
        .trim_end_matches("&apos;")
        .trim_matches('\'');
    bare == sheet_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_row_area_with_twenty_five_inserted_becomes_three_pages() {
        let wb = concat!(
            r#"<workbook><definedNames>"#,
            r#"<definedName name="_xlnm.Print_Area" localSheetId="0">Sheet1!$A$1:$F$20</definedName>"#,
            r#"</definedNames></workbook>"#
        );
        let out = repaginate_sheet(wb, 0, "Sheet1", 25).unwrap();
        assert!(out.contains(
            "Sheet1!$A$1:$F$20,Sheet1!$A$21:$F$40,Sheet1!$A$41:$F$60"
        ));
    }

    #[test]
    fn already_paged_area_is_untouched() {
        let wb = concat!(
            r#"<workbook><definedNames>"#,
            r#"<definedName name="_xlnm.Print_Area" localSheetId="0">Sheet1!$A$1:$F$20,Sheet1!$A$21:$F$40</definedName>"#,
            r#"</definedNames></workbook>"#
        );
        assert!(repaginate_sheet(wb, 0, "Sheet1", 10).is_none());
    }

    #[test]
    fn quoted_sheet_prefix_matches_by_name() {
        let wb = concat!(
            r#"<workbook><definedNames>"#,
            r#"<definedName name="_xlnm.Print_Area">&apos;請求書&apos;!$A$1:$Q$40</definedName>"#,
            r#"</definedNames></workbook>"#
        );
        let out = repaginate_sheet(wb, 0, "請求書", 41).unwrap();
        assert!(out.contains("&apos;請求書&apos;!$A$41:$Q$80"));
        assert!(out.contains("&apos;請求書&apos;!$A$81:$Q$120"));
    }
}
