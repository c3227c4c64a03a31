use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::placeholder::{Placeholder, PlaceholderKind};
use crate::shared_strings::SharedStrings;
use crate::sheet::Worksheet;
use crate::value::{lookup, stringify};

/// One table placeholder resolved against the pool: the literal token, the
/// dotted field path into a data element, and the pool indices whose text
/// carries the token.
#[derive(Debug, Clone)]
pub struct TableField {
    pub token: String,
    pub path: String,
    pub indices: Vec<u32>,
}

/// A contiguous row range bound to one data sequence.
#[derive(Debug, Clone)]
pub struct TableBlock {
    pub section: Option<String>,
    pub table: String,
    pub sheet_path: String,
    pub start_row: u32,
    pub end_row: u32,
    pub fields: Vec<TableField>,
}

impl TableBlock {
    pub fn height(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    /// `section.table` or the bare array name, for error messages.
    fn label(section: &Option<String>, table: &str) -> String {
        match section {
            Some(s) => format!("{s}.{table}"),
            None => table.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    section: Option<String>,
    table: String,
}

/// Resolves every table placeholder to its worksheet row block.
pub fn locate_blocks(
    pool: &SharedStrings,
    sheets: &[Worksheet],
    placeholders: &[Placeholder],
) -> Result<Vec<TableBlock>> {
    // group placeholders by their data sequence, first-appearance order
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<(String, String)>> = HashMap::new();
    let mut section_owner: HashMap<String, String> = HashMap::new();

    for p in placeholders {
        let (key, path) = match &p.kind {
            PlaceholderKind::LegacyArray { array, field } => (
                GroupKey { section: None, table: array.clone() },
                field.clone(),
            ),
            PlaceholderKind::SectionTable { section, table, cell } => {
                if let Some(owner) = section_owner.get(section)
                    && owner != table
                {
                    return Err(Error::DuplicateSection(section.clone()));
                }
                section_owner.insert(section.clone(), table.clone());
                (
                    GroupKey { section: Some(section.clone()), table: table.clone() },
                    cell.clone(),
                )
            }
            PlaceholderKind::Scalar => continue,
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push((p.token.clone(), path));
    }

    let mut blocks = Vec::with_capacity(order.len());
    for key in order {
        let label = TableBlock::label(&key.section, &key.table);
        let members = &groups[&key];

        let fields: Vec<TableField> = members
            .iter()
            .map(|(token, path)| TableField {
                token: token.clone(),
                path: path.clone(),
                indices: pool.indices_containing(token),
            })
            .collect();
        let all_indices: HashSet<u32> =
            fields.iter().flat_map(|f| f.indices.iter().copied()).collect();

        let mut located: Option<(&Worksheet, std::collections::BTreeSet<u32>)> = None;
        for ws in sheets {
            let rows = ws.rows_referencing(&all_indices);
            if rows.is_empty() {
                continue;
            }
            if located.is_some() {
                return Err(Error::AmbiguousTableBlock(label));
            }
            located = Some((ws, rows));
        }
        let (ws, rows) = located.ok_or_else(|| Error::TableBlockNotFound(label.clone()))?;

        let start = *rows.first().unwrap();
        let end = *rows.last().unwrap();
        if rows.len() as u32 != end - start + 1 {
            return Err(Error::NonContiguousTableBlock(label));
        }

        debug!(
            "table block {}: {} rows {}..={}",
            TableBlock::label(&key.section, &key.table),
            ws.path,
            start,
            end
        );
        blocks.push(TableBlock {
            section: key.section,
            table: key.table,
            sheet_path: ws.path.clone(),
            start_row: start,
            end_row: end,
            fields,
        });
    }
    Ok(blocks)
}

/// The data sequence a block renders. A missing or non-array value resolves
/// to the empty sequence, which blanks the template row-group.
fn resolve_sequence<'a>(data: &'a Value, block: &TableBlock) -> &'a [Value] {
    let value = match &block.section {
        Some(section) => data
            .get(section)
            .and_then(|s| s.get(&block.table))
            .or_else(|| data.get(&block.table)),
        None => data.get(&block.table),
    };
    value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

/// Expands and fills every block. Returns rows inserted per worksheet part,
/// which the print-area step needs.
pub fn expand_all(
    sheets: &mut [Worksheet],
    pool: &mut SharedStrings,
    blocks: &[TableBlock],
    data: &Value,
) -> Result<BTreeMap<String, u32>> {
    // blocks below an expanded one slide down with it
    let mut ordered: Vec<&TableBlock> = blocks.iter().collect();
    ordered.sort_by(|a, b| (&a.sheet_path, a.start_row).cmp(&(&b.sheet_path, b.start_row)));

    let mut inserted: BTreeMap<String, u32> = BTreeMap::new();
    for block in ordered {
        let offset = inserted.get(&block.sheet_path).copied().unwrap_or(0);
        let ws = sheets
            .iter_mut()
            .find(|w| w.path == block.sheet_path)
            .ok_or_else(|| Error::CorruptArchive(format!("{} not found", block.sheet_path)))?;
        let grown = expand_block(ws, pool, block, offset, data)?;
        *inserted.entry(block.sheet_path.clone()).or_insert(0) += grown;
    }
    Ok(inserted)
}

/// Expands one block in place and fills its fields. `offset` is how far the
/// block has already slid down because of earlier expansions on the sheet.
fn expand_block(
    ws: &mut Worksheet,
    pool: &mut SharedStrings,
    block: &TableBlock,
    offset: u32,
    data: &Value,
) -> Result<u32> {
    let start = block.start_row + offset;
    let end = block.end_row + offset;
    let height = block.height();

    let sequence = resolve_sequence(data, block);
    let n = sequence.len() as u32;
    let repeat = n.saturating_sub(1);

    // record (row offset, pool index, field) before any renumbering
    let mut slots: Vec<(u32, u32, &TableField)> = Vec::new();
    for row_offset in 0..height {
        let num = start + row_offset;
        let row = ws.row(num).ok_or_else(|| Error::TemplateRowMissing {
            sheet: ws.path.clone(),
            row: num,
        })?;
        for cell in &row.cells {
            let Some(idx) = cell.shared_index().filter(|_| cell.is_shared) else {
                continue;
            };
            for field in &block.fields {
                if field.indices.contains(&idx)
                    && !slots
                        .iter()
                        .any(|(o, i, f)| *o == row_offset && *i == idx && f.token == field.token)
                {
                    slots.push((row_offset, idx, field));
                }
            }
        }
    }

    if repeat > 0 {
        let grow = repeat * height;
        ws.shift_rows_from(end + 1, grow);
        ws.shift_merges_from(end + 1, grow);
        ws.clone_template_block(start, end, repeat)?;
        ws.clone_block_merges(start, end, repeat);
        debug!(
            "expanded {} block at rows {start}..={end} by {grow} rows",
            TableBlock::label(&block.section, &block.table)
        );
    }

    // one row-group per element; with no data the template group is blanked
    let groups = n.max(1);
    for i in 0..groups {
        let element = sequence.get(i as usize).unwrap_or_else(|| crate::value::null());
        for (row_offset, old_index, field) in &slots {
            let text = stringify(lookup(element, &field.path));
            let style = pool.first_run_props(*old_index as usize).map(str::to_owned);
            let new_index = pool.append(&text, style.as_deref())?;
            ws.rewrite_shared_index(start + i * height + row_offset, *old_index, new_index)?;
        }
    }

    Ok(repeat * height)
}
