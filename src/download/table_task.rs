//! One-shot task: query a table, resolve attachments, redact, rewrite
//!
//! The task runs a strictly sequential pipeline over its own private
//! [`DownloadContext`]: download the query result, bail out early when the
//! table holds no data, classify the header, collect attachment reference
//! ids, bulk-resolve them, then rewrite the result with identifiers blanked
//! and reference ids replaced by bundle entry names. Any failure deletes
//! every file the task created before the error propagates.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::UNKNOWN_ATTACHMENT_ERROR;
use crate::download::columns::classify_header;
use crate::download::context::DownloadContext;
use crate::download::params::DownloadParameters;
use crate::download::{DownloadError, DownloadResult};
use crate::store::LogStore;
use crate::table::poller::{retry_call, JobPoller, PollError, RetryPolicy};
use crate::table::{BulkResolveJob, QueryJob, TableQuery, TableService, TableServiceError};

/// Query template: one participant's rows for one upload-date range.
const QUERY_TEMPLATE: &str =
    "SELECT * FROM {table} WHERE healthCode = '{healthCode}' AND uploadDate >= '{start}' AND uploadDate <= '{end}'";

/// Downloads and redacts one table's slice of a participant's data.
pub struct TableDownloadTask {
    params: DownloadParameters,
    service: Arc<dyn TableService>,
    log_store: Arc<dyn LogStore>,
    poller: JobPoller,
    retry: RetryPolicy,
    ctx: DownloadContext,
}

impl TableDownloadTask {
    /// Create a task for the given parameters and collaborators.
    pub fn new(
        params: DownloadParameters,
        service: Arc<dyn TableService>,
        log_store: Arc<dyn LogStore>,
        poller: JobPoller,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            params,
            service,
            log_store,
            poller,
            retry,
            ctx: DownloadContext::default(),
        }
    }

    /// Run the task to completion.
    ///
    /// Returns the downloaded artifacts, or [`DownloadResult::empty`] when
    /// the table held no data for the request. On failure every file the
    /// task created is deleted before the error is returned.
    pub async fn run(mut self) -> Result<DownloadResult, DownloadError> {
        match self.run_inner().await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.cleanup_files();
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<DownloadResult, DownloadError> {
        self.download_csv().await?;

        if self.filter_no_data()? {
            return Ok(DownloadResult::empty());
        }

        self.classify_columns()?;

        let has_file_ref_columns = self
            .ctx
            .classification
            .as_ref()
            .is_some_and(|c| !c.file_ref_indexes().is_empty());
        if has_file_ref_columns {
            self.extract_reference_ids()?;
            if self.ctx.reference_ids.is_empty() {
                // Rare but possible: attachment columns exist, every cell is
                // blank.
                info!(
                    table_id = self.params.table_id(),
                    "no attachment references to resolve, skipping bulk resolution"
                );
            } else {
                self.bulk_resolve().await?;
            }
        } else {
            info!(
                table_id = self.params.table_id(),
                "no attachment columns, skipping reference extraction"
            );
        }

        self.rewrite_csv()?;

        Ok(DownloadResult {
            csv_file: self.ctx.csv_file.take(),
            bundle_file: self.ctx.bundle_file.take(),
        })
    }

    /// Query the table through the poller and download the result file.
    ///
    /// A "not found" from the service means the table was deleted remotely;
    /// the stale schema-to-table mapping is removed from the log store so
    /// future requests stop querying it, then the task fails descriptively.
    async fn download_csv(&mut self) -> Result<(), DownloadError> {
        let table_id = self.params.table_id().to_string();
        let schema_key = self.params.schema().key().to_string();
        let csv_path = self
            .params
            .work_dir()
            .join(format!("{schema_key}.csv"));

        let started = Instant::now();
        let sql = QUERY_TEMPLATE
            .replace("{table}", &table_id)
            .replace("{healthCode}", self.params.health_code())
            .replace("{start}", &self.params.start_date().to_string())
            .replace("{end}", &self.params.end_date().to_string());
        let job = QueryJob {
            service: &*self.service,
            query: TableQuery::new(&table_id, sql),
        };

        let file_ref = match self.poller.run(&job).await {
            Ok(file_ref) => file_ref,
            Err(PollError::Service(TableServiceError::NotFound(_))) => {
                if let Err(err) = self.log_store.delete_table_mapping(&schema_key).await {
                    warn!(
                        schema_key = %schema_key,
                        error = %err,
                        "failed to delete stale table mapping"
                    );
                }
                return Err(DownloadError::TableGone {
                    table_id,
                    schema_key,
                });
            }
            Err(source) => return Err(DownloadError::Query { table_id, source }),
        };

        retry_call(&self.retry, || self.service.download_file(&file_ref, &csv_path))
            .await
            .map_err(|source| DownloadError::Download {
                path: csv_path.display().to_string(),
                source,
            })?;

        info!(
            table_id = %table_id,
            path = %csv_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "downloaded table query result"
        );
        self.ctx.csv_file = Some(csv_path);
        Ok(())
    }

    /// Count lines without loading the file. Fewer than 2 lines (header
    /// only) means no data for this participant and date range; the task
    /// cleans up and reports the empty result.
    fn filter_no_data(&mut self) -> Result<bool, DownloadError> {
        let path = self.csv_file_path();
        let file = File::open(&path).map_err(|source| DownloadError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut lines = 0;
        for line in BufReader::new(file).lines() {
            line.map_err(|source| DownloadError::Io {
                path: path.display().to_string(),
                source,
            })?;
            lines += 1;
            if lines >= 2 {
                // Header plus at least one data row; keep going.
                return Ok(false);
            }
        }

        info!(path = %path.display(), "no participant data in query result, short-circuiting");
        self.cleanup_files();
        Ok(true)
    }

    /// Read only the header row and classify its columns.
    fn classify_columns(&mut self) -> Result<(), DownloadError> {
        let path = self.csv_file_path();
        let mut reader = csv_reader(&path)?;
        let mut records = reader.records();
        let header = match records.next() {
            Some(record) => record.map_err(|err| DownloadError::Csv {
                path: path.display().to_string(),
                message: err.to_string(),
            })?,
            None => {
                return Err(DownloadError::Csv {
                    path: path.display().to_string(),
                    message: "missing header row".to_string(),
                })
            }
        };

        let columns: Vec<String> = header.iter().map(str::to_owned).collect();
        let classification =
            classify_header(&columns, self.params.schema(), &path.display().to_string())?;
        self.ctx.classification = Some(classification);
        Ok(())
    }

    /// Scan data rows and collect every non-blank value from the
    /// file-reference columns into the deduplicated reference set.
    fn extract_reference_ids(&mut self) -> Result<(), DownloadError> {
        let path = self.csv_file_path();
        let indexes = self
            .ctx
            .classification
            .as_ref()
            .map(|c| c.file_ref_indexes().clone())
            .unwrap_or_default();

        let started = Instant::now();
        let mut reader = csv_reader(&path)?;
        for (row_number, record) in reader.records().enumerate() {
            let record = record.map_err(|err| DownloadError::Csv {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
            if row_number == 0 {
                // Header row, already classified.
                continue;
            }
            for &index in &indexes {
                if let Some(value) = record.get(index) {
                    if !value.is_empty() {
                        self.ctx.reference_ids.insert(value.to_string());
                    }
                }
            }
        }

        info!(
            path = %path.display(),
            num_references = self.ctx.reference_ids.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted attachment references"
        );
        Ok(())
    }

    /// Bulk-resolve the collected reference ids and download the bundle.
    async fn bulk_resolve(&mut self) -> Result<(), DownloadError> {
        let table_id = self.params.table_id().to_string();
        let bundle_path = self
            .params
            .work_dir()
            .join(format!("{}.zip", self.params.schema().key()));

        let started = Instant::now();
        let job = BulkResolveJob {
            service: &*self.service,
            table_id: &table_id,
            reference_ids: &self.ctx.reference_ids,
        };
        let bundle = self
            .poller
            .run(&job)
            .await
            .map_err(|source| DownloadError::BulkResolve {
                table_id: table_id.clone(),
                source,
            })?;
        self.ctx.summaries = bundle.summaries;

        retry_call(&self.retry, || {
            self.service.download_file(&bundle.bundle_ref, &bundle_path)
        })
        .await
        .map_err(|source| DownloadError::Download {
            path: bundle_path.display().to_string(),
            source,
        })?;

        info!(
            table_id = %table_id,
            path = %bundle_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "downloaded resolved attachment bundle"
        );
        self.ctx.bundle_file = Some(bundle_path);
        Ok(())
    }

    /// Stream the result into a rewritten copy: blank the health code,
    /// replace each reference id with its bundle entry name, its recorded
    /// failure message, or the fixed unknown-error placeholder. The copy
    /// atomically replaces the original.
    fn rewrite_csv(&mut self) -> Result<(), DownloadError> {
        let path = self.csv_file_path();
        let rewritten_path = self
            .params
            .work_dir()
            .join(format!("{}-rewritten.csv", self.params.schema().key()));

        let mut replacements: HashMap<&str, &str> = HashMap::new();
        for summary in &self.ctx.summaries {
            if summary.reference_id.is_empty() {
                continue;
            }
            if let Some(entry_name) = summary.entry_name.as_deref().filter(|s| !s.is_empty()) {
                replacements.insert(&summary.reference_id, entry_name);
            } else if let Some(failure) =
                summary.failure_message.as_deref().filter(|s| !s.is_empty())
            {
                replacements.insert(&summary.reference_id, failure);
            }
        }

        // classify_columns always runs before rewrite_csv.
        let classification = self
            .ctx
            .classification
            .clone()
            .expect("columns classified before rewrite");
        let health_code_index = classification.health_code_index();

        let started = Instant::now();
        self.ctx.rewritten_file = Some(rewritten_path.clone());
        {
            let mut reader = csv_reader(&path)?;
            let out_file =
                File::create(&rewritten_path).map_err(|source| DownloadError::Io {
                    path: rewritten_path.display().to_string(),
                    source,
                })?;
            let mut writer = csv::Writer::from_writer(BufWriter::new(out_file));

            for (row_number, record) in reader.records().enumerate() {
                let record = record.map_err(|err| DownloadError::Csv {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
                if row_number == 0 {
                    // Header row is copied through untouched.
                    write_row(&mut writer, &record, &rewritten_path)?;
                    continue;
                }

                let mut fields: Vec<String> = record.iter().map(str::to_owned).collect();
                if let Some(cell) = fields.get_mut(health_code_index) {
                    cell.clear();
                }
                for &index in classification.file_ref_indexes() {
                    let Some(cell) = fields.get_mut(index) else {
                        continue;
                    };
                    if cell.is_empty() {
                        continue;
                    }
                    *cell = replacements
                        .get(cell.as_str())
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| UNKNOWN_ATTACHMENT_ERROR.to_string());
                }
                write_row(&mut writer, &fields, &rewritten_path)?;
            }

            writer.flush().map_err(|source| DownloadError::Io {
                path: rewritten_path.display().to_string(),
                source,
            })?;
        }

        std::fs::rename(&rewritten_path, &path).map_err(|source| DownloadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.ctx.rewritten_file = None;

        info!(
            path = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rewrote query result with redacted identifiers"
        );
        Ok(())
    }

    /// Delete every file this task created, ignoring files that never made
    /// it to disk.
    fn cleanup_files(&mut self) {
        for file in self.ctx.files_to_delete() {
            if !file.exists() {
                continue;
            }
            if let Err(err) = std::fs::remove_file(file) {
                warn!(path = %file.display(), error = %err, "failed to delete task file");
            }
        }
        self.ctx.csv_file = None;
        self.ctx.bundle_file = None;
        self.ctx.rewritten_file = None;
    }

    fn csv_file_path(&self) -> PathBuf {
        // Only called after download_csv has populated the context.
        self.ctx
            .csv_file
            .clone()
            .expect("query result downloaded before this stage")
    }
}

fn csv_reader(path: &Path) -> Result<csv::Reader<File>, DownloadError> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|err| DownloadError::Csv {
            path: path.display().to_string(),
            message: err.to_string(),
        })
}

fn write_row<W, I, S>(
    writer: &mut csv::Writer<W>,
    row: I,
    path: &Path,
) -> Result<(), DownloadError>
where
    W: std::io::Write,
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    writer.write_record(row).map_err(|err| DownloadError::Csv {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}
