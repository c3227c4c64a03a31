//! In-place xlsx report generation.
//!
//! A template workbook carries `{{...}}` placeholder tokens in its shared
//! string pool. This crate substitutes caller-supplied values, repeats table
//! row-groups to fit variable-length data, re-pages the print area when rows
//! were inserted, and can strip the workbook down to a single sheet. All of
//! it edits the archive's XML parts directly, so page setup, fonts, merges,
//! row heights and every other property of the template survive untouched.
//!
//! Three placeholder syntaxes:
//! - `{{name}}` takes a scalar value from the payload.
//! - `{{#array.field}}` is the legacy form: `array` names a sequence, one
//!   row per element.
//! - `{{##section.table.cell}}` reads the sequence at `data[section][table]`.
//!   A template may not mix this with the legacy form.

mod archive;
mod coord;
mod error;
mod placeholder;
mod print_area;
mod shared_strings;
mod sheet;
mod sheet_select;
mod table;
mod value;
mod workbook;


use std::collections::BTreeMap;

use log::debug;
use regex::Regex;
use serde_json::Value;

pub use crate::error::{Error, Result};
pub use crate::placeholder::{Placeholder, PlaceholderKind};
pub use crate::workbook::SheetSelector;

use crate::archive::Archive;
use crate::placeholder::scan_tokens;
use crate::shared_strings::SharedStrings;
use crate::sheet::Worksheet;
use crate::value::stringify;

/// Renders a template: expands table blocks against `data`, substitutes
/// placeholders, re-pages print areas, and optionally keeps only the sheet
/// named by `selector`. Returns the finished workbook bytes; any failure
/// aborts before output exists.
pub fn expand_and_substitute(
    template: &[u8],
    data: &Value,
    selector: Option<&SheetSelector>,
) -> Result<Vec<u8>> {
    let mut archive = Archive::open(template)?;
    let mut pool = SharedStrings::load(&archive)?;

    let placeholders = scan_tokens(&pool.joined_text());
    placeholder::ensure_single_syntax(&placeholders)?;
    debug!("template: {} distinct placeholder tokens", placeholders.len());

    let mut inserted: BTreeMap<String, u32> = BTreeMap::new();
    if placeholders.iter().any(Placeholder::is_table) {
        let mut sheets = load_worksheets(&archive)?;
        let blocks = table::locate_blocks(&pool, &sheets, &placeholders)?;
        inserted = table::expand_all(&mut sheets, &mut pool, &blocks, data)?;
        for ws in &sheets {
            if ws.is_modified() {
                ws.store(&mut archive)?;
            }
        }
    }

    if let Some(map) = data.as_object() {
        for p in &placeholders {
            if p.kind != PlaceholderKind::Scalar {
                continue;
            }
            match map.get(&p.key) {
                Some(v) if !v.is_array() && !v.is_object() => {
                    pool.replace_token(&p.token, &stringify(v))?;
                }
                // unmatched scalars stay literal; sequence values are not scalars
                _ => {}
            }
        }
    }
    pool.store(&mut archive);

    print_area::repaginate(&mut archive, &inserted)?;

    if let Some(sel) = selector {
        sheet_select::extract_single_sheet(&mut archive, sel)?;
    }
    archive.to_bytes()
}

/// Unique placeholder keys found in the template, sorted. A template without
/// a shared-string pool simply has none.
pub fn list_placeholders(template: &[u8]) -> Result<Vec<String>> {
    let mut keys: Vec<String> = describe_placeholders(template)?
        .into_iter()
        .map(|p| p.key)
        .collect();
    keys.sort();
    keys.dedup();
    Ok(keys)
}

/// Every distinct token with its key and occurrence count, in first-seen
/// order. Scanning is read-only and idempotent.
pub fn describe_placeholders(template: &[u8]) -> Result<Vec<Placeholder>> {
    let archive = Archive::open(template)?;
    match SharedStrings::try_load(&archive)? {
        Some(pool) => Ok(scan_tokens(&pool.joined_text())),
        None => Ok(Vec::new()),
    }
}

/// Keeps only the worksheet named by `selector`, leaving cell contents
/// untouched.
pub fn extract_sheet(template: &[u8], selector: &SheetSelector) -> Result<Vec<u8>> {
    let mut archive = Archive::open(template)?;
    sheet_select::extract_single_sheet(&mut archive, selector)?;
    archive.to_bytes()
}

fn load_worksheets(archive: &Archive) -> Result<Vec<Worksheet>> {
    let part_re = Regex::new(r"^xl/worksheets/sheet\d+\.xml$").unwrap();
    let mut sheets = Vec::new();
    for path in archive.part_names_with_prefix(workbook::WORKSHEET_PREFIX) {
        if part_re.is_match(&path) {
            sheets.push(Worksheet::load(archive, &path)?);
        }
    }
    Ok(sheets)
}
