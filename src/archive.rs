use std::io::{Cursor, Read, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// In-memory view of the xlsx container: an ordered list of named parts.
///
/// Untouched parts are written back byte-for-byte. [`Archive::to_bytes`]
/// re-deflates the whole container deterministically.
pub struct Archive {
    parts: Vec<(String, Vec<u8>)>,
}

impl Archive {
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let mut zin = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(zin.len());
        for i in 0..zin.len() {
            let mut file = zin.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            parts.push((file.name().to_owned(), buf));
        }
        Ok(Self { parts })
    }

    /// Part text as UTF-8, or `None` if the part does not exist.
    pub fn part_text(&self, path: &str) -> Option<String> {
        self.parts
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Like [`Archive::part_text`] but a missing part is a corrupt archive.
    pub fn require_text(&self, path: &str) -> Result<String> {
        self.part_text(path)
            .ok_or_else(|| Error::CorruptArchive(format!("{path} not found")))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.parts.iter().any(|(p, _)| p == path)
    }

    /// Replaces the part in place, or appends it if new.
    pub fn put_part(&mut self, path: &str, content: String) {
        if let Some((_, bytes)) = self.parts.iter_mut().find(|(p, _)| p == path) {
            *bytes = content.into_bytes();
        } else {
            self.parts.push((path.to_owned(), content.into_bytes()));
        }
    }

    pub fn remove_part(&mut self, path: &str) {
        self.parts.retain(|(p, _)| p != path);
    }

    /// Part names starting with `prefix`, in archive order.
    pub fn part_names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.parts
            .iter()
            .filter(|(p, _)| p.starts_with(prefix))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Serializes every retained part back into a deflated zip container.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        let opt: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(1));
        for (path, bytes) in &self.parts {
            zout.start_file(path.as_str(), opt)?;
            zout.write_all(bytes)?;
        }
        Ok(zout.finish()?.into_inner())
    }
}
