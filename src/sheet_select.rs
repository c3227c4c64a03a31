use log::debug;
use regex::Regex;

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::workbook::{
    self, CONTENT_TYPES_PART, SheetEntry, SheetSelector, WORKBOOK_PART, WORKBOOK_RELS_PART,
};

/// Strips the workbook down to one worksheet: manifest, relationships,
/// content types and defined-name scoping are all rewritten so the archive
/// stays internally consistent, and every other worksheet part (plus its
/// `.rels`) is removed.
pub fn extract_single_sheet(archive: &mut Archive, selector: &SheetSelector) -> Result<()> {
    let workbook_xml = archive.require_text(WORKBOOK_PART)?;
    let rels_xml = archive.require_text(WORKBOOK_RELS_PART)?;

    let sheets = workbook::parse_sheets(&workbook_xml)?;
    if sheets.is_empty() {
        return Err(Error::CorruptArchive("workbook has no sheets".into()));
    }
    let target = workbook::resolve_selector(&sheets, selector)?.clone();
    let kept_path = workbook::worksheet_target(&rels_xml, &target.rel_id).ok_or_else(|| {
        Error::CorruptArchive(format!("no worksheet relationship for {}", target.rel_id))
    })?;
    debug!("keeping sheet `{}` ({})", target.name, kept_path);

    archive.put_part(WORKBOOK_PART, rewrite_workbook(&workbook_xml, &target)?);
    archive.put_part(WORKBOOK_RELS_PART, rewrite_rels(&rels_xml, &target.rel_id)?);
    if let Some(types_xml) = archive.part_text(CONTENT_TYPES_PART) {
        archive.put_part(CONTENT_TYPES_PART, rewrite_content_types(&types_xml, &kept_path)?);
    }

    let sheet_part_re = Regex::new(r"^xl/worksheets/sheet\d+\.xml$").unwrap();
    for part in archive.part_names_with_prefix("xl/worksheets/") {
        if sheet_part_re.is_match(&part) && part != kept_path {
            archive.remove_part(&part);
        }
    }
    let rels_part_re = Regex::new(r"^xl/worksheets/_rels/sheet\d+\.xml\.rels$").unwrap();
    for part in archive.part_names_with_prefix("xl/worksheets/_rels/") {
        if !rels_part_re.is_match(&part) {
            continue;
        }
        let owner = part.replace("_rels/", "");
        let owner = owner.trim_end_matches(".rels");
        if owner != kept_path {
            archive.remove_part(&part);
        }
    }
    Ok(())
}

fn rewrite_workbook(workbook_xml: &str, target: &SheetEntry) -> Result<String> {
    let sheets_re = Regex::new(r"(?s)<sheets>.*?</sheets>").unwrap();
    if !sheets_re.is_match(workbook_xml) {
        return Err(Error::malformed(WORKBOOK_PART, "<sheets> not found"));
    }
    let mut out = sheets_re
        .replace(
            workbook_xml,
            regex::NoExpand(&format!("<sheets>{}</sheets>", target.raw)),
        )
        .into_owned();

    // a single-sheet workbook points at the first (only) tab
    let view_re = Regex::new(r"<workbookView\b([^>]*)/>").unwrap();
    if let Some((range, attrs)) = view_re
        .captures(&out)
        .map(|c| (c.get(0).unwrap().range(), c[1].to_owned()))
    {
        let attrs = reset_index_attr(&attrs, "activeTab");
        let attrs = reset_index_attr(&attrs, "firstSheet");
        out.replace_range(range, &format!("<workbookView{attrs}/>"));
    }

    let names_re = Regex::new(r"(?s)<definedNames>(.*?)</definedNames>").unwrap();
    if let Some((range, inner)) = names_re
        .captures(&out)
        .map(|c| (c.get(0).unwrap().range(), c[1].to_owned()))
    {
        let tag_re = Regex::new(r"(?s)<definedName\b.*?</definedName>").unwrap();
        let mut kept = String::new();
        for m in tag_re.find_iter(&inner) {
            let tag = m.as_str();
            match workbook::tag_attr(tag, "localSheetId") {
                None => kept.push_str(tag),
                Some(local) if local.parse::<usize>().ok() == Some(target.index) => {
                    let local_re = Regex::new(r#"\blocalSheetId="[^"]*""#).unwrap();
                    kept.push_str(&local_re.replace(tag, r#"localSheetId="0""#));
                }
                Some(_) => {}
            }
        }
        if kept.is_empty() {
            out.replace_range(range, "");
        } else {
            out.replace_range(range, &format!("<definedNames>{kept}</definedNames>"));
        }
    }
    Ok(out)
}

fn reset_index_attr(attrs: &str, name: &str) -> String {
    let re = Regex::new(&format!(r#"\b{name}="[^"]*""#)).unwrap();
    if re.is_match(attrs) {
        re.replace(attrs, format!(r#"{name}="0""#).as_str()).into_owned()
    } else {
        format!(r#"{attrs} {name}="0""#)
    }
}

fn rewrite_rels(rels_xml: &str, kept_rel_id: &str) -> Result<String> {
    let open_re = Regex::new(r"<Relationships[^>]*>").unwrap();
    let head = open_re
        .find(rels_xml)
        .map(|m| rels_xml[..m.end()].to_owned())
        .ok_or_else(|| Error::malformed(WORKBOOK_RELS_PART, "<Relationships> not found"))?;

    let tag_re = Regex::new(r"<Relationship\b[^>]*/>").unwrap();
    let mut kept = String::new();
    for m in tag_re.find_iter(rels_xml) {
        let tag = m.as_str();
        let is_worksheet = workbook::tag_attr(tag, "Type")
            .is_some_and(|t| t.ends_with("/worksheet"));
        if !is_worksheet || workbook::tag_attr(tag, "Id").as_deref() == Some(kept_rel_id) {
            kept.push_str(tag);
        }
    }
    Ok(format!("{head}{kept}</Relationships>"))
}

fn rewrite_content_types(types_xml: &str, kept_path: &str) -> Result<String> {
    let open_re = Regex::new(r"<Types[^>]*>").unwrap();
    let head = open_re
        .find(types_xml)
        .map(|m| types_xml[..m.end()].to_owned())
        .ok_or_else(|| Error::malformed(CONTENT_TYPES_PART, "<Types> not found"))?;

    let default_re = Regex::new(r"<Default\b[^>]*/>").unwrap();
    let override_re = Regex::new(r"<Override\b[^>]*/>").unwrap();
    let kept_part_name = format!("/{}", kept_path.trim_start_matches('/'));

    let mut body = String::new();
    for m in default_re.find_iter(types_xml) {
        body.push_str(m.as_str());
    }
    for m in override_re.find_iter(types_xml) {
        let tag = m.as_str();
        let keep = match workbook::tag_attr(tag, "PartName") {
            Some(part) => {
                let normalized = if part.starts_with('/') { part } else { format!("/{part}") };
                !normalized.starts_with("/xl/worksheets/") || normalized == kept_part_name
            }
            None => true,
        };
        if keep {
            body.push_str(tag);
        }
    }
    Ok(format!("{head}{body}</Types>"))
}
