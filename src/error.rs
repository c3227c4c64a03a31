use thiserror::Error;

/// Failures raised by the transformation pipeline. Every variant is fatal:
/// the engine never hands back a partially rewritten archive.
#[derive(Debug, Error)]
pub enum Error {
    /// A required part (shared-string pool, workbook manifest, ...) is absent
    /// or unreadable.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// The template uses both `{{#array.field}}` and `{{##section.table.cell}}`
    /// placeholders at once.
    #[error("template mixes legacy-array and section-table placeholder syntaxes")]
    MixedPlaceholderSyntax,

    /// One `section` value is bound to more than one table.
    #[error("section `{0}` is used by more than one table")]
    DuplicateSection(String),

    /// The rows referencing a table's placeholders have gaps.
    #[error("rows for table `{0}` are not contiguous")]
    NonContiguousTableBlock(String),

    /// A table's placeholders are referenced from more than one worksheet.
    #[error("table `{0}` is referenced from more than one worksheet")]
    AmbiguousTableBlock(String),

    /// No worksheet cell references a table's placeholders.
    #[error("no worksheet cell references table `{0}`")]
    TableBlockNotFound(String),

    /// A template row vanished mid-expansion. Internal invariant violation,
    /// not a user input error.
    #[error("template row {row} missing on {sheet}")]
    TemplateRowMissing { sheet: String, row: u32 },

    /// The sheet selector matched nothing.
    #[error("worksheet not found ({0})")]
    SheetNotFound(String),

    /// A part's XML does not have the structure the rewrite needs
    /// (missing `</sheetData>`, unclosed `<sheets>`, ...).
    #[error("malformed {part}: {detail}")]
    MalformedPart { part: String, detail: String },

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(part: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::MalformedPart {
            part: part.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
