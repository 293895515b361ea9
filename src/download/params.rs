//! Download task parameters and export schemas

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::download::DownloadError;

/// Field type tags that mark a schema field as an attachment reference.
/// Matched case-insensitively against the schema's declared field types.
pub const ATTACHMENT_TYPE_TAGS: [&str; 5] = [
    "attachment_blob",
    "attachment_csv",
    "attachment_json_blob",
    "attachment_json_table",
    "attachment_v2",
];

/// Schema descriptor for one exported table: a human-readable key used for
/// file naming plus the declared type of every field.
#[derive(Debug, Clone)]
pub struct ExportSchema {
    key: String,
    field_types: HashMap<String, String>,
}

impl ExportSchema {
    /// Create a schema from its key and field-type map.
    pub fn new(key: impl Into<String>, field_types: HashMap<String, String>) -> Self {
        Self {
            key: key.into(),
            field_types,
        }
    }

    /// Human-readable schema key, e.g. `"my-app-cardio-survey-v3"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Names of fields whose declared type is one of the attachment tags.
    pub fn attachment_fields(&self) -> HashSet<&str> {
        self.field_types
            .iter()
            .filter(|(_, field_type)| {
                let lowered = field_type.to_lowercase();
                ATTACHMENT_TYPE_TAGS.contains(&lowered.as_str())
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Immutable arguments for one table-download task.
///
/// Built through [`DownloadParametersBuilder`], which validates that every
/// field is present, strings are non-blank, and the date range is ordered.
#[derive(Debug, Clone)]
pub struct DownloadParameters {
    table_id: String,
    health_code: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    work_dir: PathBuf,
    schema: ExportSchema,
}

impl DownloadParameters {
    /// Start building parameters.
    pub fn builder() -> DownloadParametersBuilder {
        DownloadParametersBuilder::default()
    }

    /// Table to query.
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Health code to filter on.
    pub fn health_code(&self) -> &str {
        &self.health_code
    }

    /// First upload date to include.
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Last upload date to include.
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Directory the task writes its files into.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Schema describing the table, used for attachment detection and file
    /// naming.
    pub fn schema(&self) -> &ExportSchema {
        &self.schema
    }
}

/// Builder for [`DownloadParameters`].
#[derive(Debug, Default)]
pub struct DownloadParametersBuilder {
    table_id: Option<String>,
    health_code: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    work_dir: Option<PathBuf>,
    schema: Option<ExportSchema>,
}

impl DownloadParametersBuilder {
    /// Set the table id.
    pub fn table_id(mut self, table_id: impl Into<String>) -> Self {
        self.table_id = Some(table_id.into());
        self
    }

    /// Set the health code.
    pub fn health_code(mut self, health_code: impl Into<String>) -> Self {
        self.health_code = Some(health_code.into());
        self
    }

    /// Set the start date.
    pub fn start_date(mut self, start_date: NaiveDate) -> Self {
        self.start_date = Some(start_date);
        self
    }

    /// Set the end date (inclusive).
    pub fn end_date(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Set the working directory.
    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Set the schema.
    pub fn schema(mut self, schema: ExportSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<DownloadParameters, DownloadError> {
        let table_id = require_non_blank(self.table_id, "tableId")?;
        let health_code = require_non_blank(self.health_code, "healthCode")?;
        let start_date = self
            .start_date
            .ok_or_else(|| missing_field("startDate"))?;
        let end_date = self.end_date.ok_or_else(|| missing_field("endDate"))?;
        let work_dir = self.work_dir.ok_or_else(|| missing_field("workDir"))?;
        let schema = self.schema.ok_or_else(|| missing_field("schema"))?;

        if start_date > end_date {
            return Err(DownloadError::InvalidParameters(
                "startDate can't be after endDate".to_string(),
            ));
        }

        Ok(DownloadParameters {
            table_id,
            health_code,
            start_date,
            end_date,
            work_dir,
            schema,
        })
    }
}

fn require_non_blank(value: Option<String>, field: &str) -> Result<String, DownloadError> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(missing_field(field)),
    }
}

fn missing_field(field: &str) -> DownloadError {
    DownloadError::InvalidParameters(format!("{field} must be specified"))
}
