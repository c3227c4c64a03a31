use quick_xml::escape::unescape;
use regex::Regex;

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::value::xml_escape;

pub const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// The shared string pool, kept as raw part text plus a parsed view.
///
/// Entries that are never touched keep their original bytes. A touched entry
/// is regenerated as a single run carrying the entry's first-run `<rPr>`
/// properties (or as plain text when none were recorded). Appends go through
/// [`SharedStrings::append`] only, which bumps the header's `count` and
/// `uniqueCount` in the same operation.
pub struct SharedStrings {
    xml: String,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    /// Unescaped text, all runs concatenated.
    text: String,
    /// Raw `<rPr>...</rPr>` of the first run, if the entry was styled.
    first_run: Option<String>,
}

impl SharedStrings {
    pub fn load(archive: &Archive) -> Result<Self> {
        let xml = archive.require_text(SHARED_STRINGS_PART)?;
        let entries = parse_entries(&xml)?;
        Ok(Self { xml, entries })
    }

    /// `Ok(None)` when the archive simply has no pool, as in a template
    /// without any text cells. Listing callers treat that as "no
    /// placeholders".
    pub fn try_load(archive: &Archive) -> Result<Option<Self>> {
        match archive.part_text(SHARED_STRINGS_PART) {
            Some(xml) => {
                let entries = parse_entries(&xml)?;
                Ok(Some(Self { xml, entries }))
            }
            None => Ok(None),
        }
    }

    /// All entry texts joined for token scanning. Tokens never span entries.
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            out.push_str(&e.text);
            out.push('\n');
        }
        out
    }

    /// Indices of entries whose text contains `needle`.
    pub fn indices_containing(&self, needle: &str) -> Vec<u32> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.text.contains(needle))
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn first_run_props(&self, index: usize) -> Option<&str> {
        self.entries.get(index).and_then(|e| e.first_run.as_deref())
    }

    /// Scalar pass: rewrites every entry containing `token`, substituting
    /// `value` into its text. The entry is regenerated with its first-run
    /// style, so a styled placeholder keeps its formatting.
    pub fn replace_token(&mut self, token: &str, value: &str) -> Result<()> {
        for index in 0..self.entries.len() {
            if self.entries[index].text.contains(token) {
                let new_text = self.entries[index].text.replace(token, value);
                self.rewrite_entry(index, new_text)?;
            }
        }
        Ok(())
    }

    /// Appends a new entry, optionally styled with a raw `<rPr>` block, and
    /// returns its index. Counter bookkeeping is part of the same operation.
    pub fn append(&mut self, text: &str, first_run: Option<&str>) -> Result<u32> {
        let index = self.entries.len() as u32;
        let rendered = render_entry(text, first_run);
        let close = memchr::memmem::rfind(self.xml.as_bytes(), b"</sst>")
            .ok_or_else(|| Error::malformed(SHARED_STRINGS_PART, "</sst> not found"))?;
        self.xml.insert_str(close, &rendered);
        self.bump_counters()?;
        self.entries.push(Entry {
            text: text.to_owned(),
            first_run: first_run.map(str::to_owned),
        });
        Ok(index)
    }

    pub fn store(&self, archive: &mut Archive) {
        archive.put_part(SHARED_STRINGS_PART, self.xml.clone());
    }

    fn rewrite_entry(&mut self, index: usize, new_text: String) -> Result<()> {
        let (start, end) = entry_span(&self.xml, index)
            .ok_or_else(|| Error::malformed(SHARED_STRINGS_PART, format!("<si> #{index} not found")))?;
        let rendered = render_entry(&new_text, self.entries[index].first_run.as_deref());
        self.xml.replace_range(start..end, &rendered);
        self.entries[index].text = new_text;
        Ok(())
    }

    /// Increments `count` and `uniqueCount` on the `<sst>` open tag. Pools
    /// written without the attributes are left as they are.
    fn bump_counters(&mut self) -> Result<()> {
        let sst = memchr::memmem::find(self.xml.as_bytes(), b"<sst")
            .ok_or_else(|| Error::malformed(SHARED_STRINGS_PART, "<sst> not found"))?;
        let tag_end = self.xml[sst..]
            .find('>')
            .map(|i| sst + i)
            .ok_or_else(|| Error::malformed(SHARED_STRINGS_PART, "unclosed <sst> tag"))?;
        let mut head = self.xml[sst..tag_end].to_owned();
        for (pattern, attr) in [
            (r#"\buniqueCount="(\d+)""#, "uniqueCount"),
            (r#"\bcount="(\d+)""#, "count"),
        ] {
            let re = Regex::new(pattern).unwrap();
            let found = re
                .captures(&head)
                .map(|caps| (caps.get(0).unwrap().range(), caps[1].parse::<u64>().unwrap_or(0)));
            if let Some((range, n)) = found {
                head.replace_range(range, &format!(r#"{attr}="{}""#, n + 1));
            }
        }
        self.xml.replace_range(sst..tag_end, &head);
        Ok(())
    }
}

fn render_entry(text: &str, first_run: Option<&str>) -> String {
    let escaped = xml_escape(text);
    match first_run {
        Some(rpr) => format!(r#"<si><r>{rpr}<t xml:space="preserve">{escaped}</t></r></si>"#),
        None => format!(r#"<si><t xml:space="preserve">{escaped}</t></si>"#),
    }
}

/// Byte span of the `index`-th `<si>` element, tags included.
fn entry_span(xml: &str, index: usize) -> Option<(usize, usize)> {
    let bytes = xml.as_bytes();
    let mut seen = 0usize;
    for start in memchr::memmem::find_iter(bytes, b"<si") {
        match bytes.get(start + 3) {
            Some(b'>') | Some(b' ') | Some(b'/') => {}
            _ => continue,
        }
        if bytes[start + 3] == b'/' {
            // self-closing empty entry
            if seen == index {
                return Some((start, start + xml[start..].find('>')? + 1));
            }
            seen += 1;
            continue;
        }
        if seen == index {
            let end = memchr::memmem::find(&bytes[start..], b"</si>")? + start + "</si>".len();
            return Some((start, end));
        }
        seen += 1;
    }
    None
}

fn parse_entries(xml: &str) -> Result<Vec<Entry>> {
    let text_re = Regex::new(r"(?s)<t(?:\s[^>]*)?>(.*?)</t>").unwrap();
    let rpr_re = Regex::new(r"(?s)<rPr>.*?</rPr>").unwrap();
    // phonetic runs carry their own <t>, which is not cell text
    let rph_re = Regex::new(r"(?s)<rPh\b.*?</rPh>").unwrap();

    let mut entries = Vec::new();
    let mut index = 0usize;
    while let Some((start, end)) = entry_span(xml, index) {
        let body = rph_re.replace_all(&xml[start..end], "");
        let body = body.as_ref();
        let mut text = String::new();
        for caps in text_re.captures_iter(body) {
            let unescaped = unescape(&caps[1])
                .map_err(|e| Error::malformed(SHARED_STRINGS_PART, e.to_string()))?;
            text.push_str(&unescaped);
        }
        let first_run = rpr_re.find(body).map(|m| m.as_str().to_owned());
        entries.push(Entry { text, first_run });
        index += 1;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="2">"#,
        r#"<si><t>{{会社名}}</t></si>"#,
        r#"<si><r><rPr><b/><sz val="11"/></rPr><t>{{#明細.品名}}</t></r></si>"#,
        r#"</sst>"#
    );

    fn pool() -> SharedStrings {
        let entries = parse_entries(POOL).unwrap();
        SharedStrings { xml: POOL.to_owned(), entries }
    }

    #[test]
    fn parses_texts_and_first_run() {
        let p = pool();
        assert_eq!(p.entries.len(), 2);
        assert_eq!(p.entries[0].text, "{{会社名}}");
        assert_eq!(p.entries[1].text, "{{#明細.品名}}");
        assert_eq!(p.first_run_props(0), None);
        assert_eq!(p.first_run_props(1), Some(r#"<rPr><b/><sz val="11"/></rPr>"#));
    }

    #[test]
    fn append_bumps_both_counters_and_returns_index() {
        let mut p = pool();
        let idx = p.append("A社 & B社", None).unwrap();
        assert_eq!(idx, 2);
        assert!(p.xml.contains(r#"count="4""#));
        assert!(p.xml.contains(r#"uniqueCount="3""#));
        assert!(p.xml.contains("A社 &amp; B社"));
    }

    #[test]
    fn replace_keeps_styled_run() {
        let mut p = pool();
        p.replace_token("{{会社名}}", "A社 <共同>").unwrap();
        assert!(p.xml.contains("A社 &lt;共同&gt;"));
        assert!(!p.xml.contains("{{会社名}}"));
        // styled entry untouched, still styled
        assert!(p.xml.contains("<rPr><b/>"));
    }
}
