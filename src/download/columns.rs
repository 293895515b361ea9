//! Header-row classification for downloaded query results

use std::collections::HashSet;

use crate::download::params::ExportSchema;
use crate::download::DownloadError;

/// Canonical name of the participant identifier column.
pub const HEALTH_CODE_COLUMN: &str = "healthCode";

/// Column roles derived from one query result's header row: the identifier
/// column to redact and the file-reference columns to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnClassification {
    health_code_index: usize,
    file_ref_indexes: HashSet<usize>,
}

impl ColumnClassification {
    /// Index of the `healthCode` column.
    pub fn health_code_index(&self) -> usize {
        self.health_code_index
    }

    /// Indexes of columns holding attachment reference ids. May be empty.
    pub fn file_ref_indexes(&self) -> &HashSet<usize> {
        &self.file_ref_indexes
    }
}

/// Classify a header row against a schema.
///
/// The column named `healthCode` is the identifier column and must exist;
/// its absence means the table is malformed and the request cannot be
/// served. Every other column whose schema-declared type is an attachment
/// tag is a file-reference column.
pub fn classify_header(
    header: &[String],
    schema: &ExportSchema,
    file: &str,
) -> Result<ColumnClassification, DownloadError> {
    let attachment_fields = schema.attachment_fields();

    let mut health_code_index = None;
    let mut file_ref_indexes = HashSet::new();
    for (index, name) in header.iter().enumerate() {
        if name == HEALTH_CODE_COLUMN {
            health_code_index = Some(index);
        } else if attachment_fields.contains(name.as_str()) {
            file_ref_indexes.insert(index);
        }
    }

    let health_code_index =
        health_code_index.ok_or_else(|| DownloadError::MissingHealthCodeColumn {
            file: file.to_string(),
        })?;

    Ok(ColumnClassification {
        health_code_index,
        file_ref_indexes,
    })
}
