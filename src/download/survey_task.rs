//! One-shot task: dump a whole survey metadata table to a file

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::download::DownloadError;
use crate::store::LogStore;
use crate::table::poller::{retry_call, JobPoller, RetryPolicy};
use crate::table::{QueryJob, TableQuery, TableService, TableServiceError};

/// Downloads one survey metadata table in its entirety, unfiltered and
/// unredacted, named after the table's display name.
pub struct SurveyDownloadTask {
    app_id: String,
    table_id: String,
    work_dir: PathBuf,
    service: Arc<dyn TableService>,
    log_store: Arc<dyn LogStore>,
    poller: JobPoller,
    retry: RetryPolicy,
}

impl SurveyDownloadTask {
    /// Create a task for the given survey table.
    pub fn new(
        app_id: impl Into<String>,
        table_id: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        service: Arc<dyn TableService>,
        log_store: Arc<dyn LogStore>,
        poller: JobPoller,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            table_id: table_id.into(),
            work_dir: work_dir.into(),
            service,
            log_store,
            poller,
            retry,
        }
    }

    /// Run the task, returning the downloaded file (never empty-handed on
    /// success). A partial file is deleted before any error propagates.
    ///
    /// A "not found" from the metadata lookup means the survey table was
    /// deleted remotely; the stale survey mapping is removed from the log
    /// store before the task fails.
    pub async fn run(self) -> Result<PathBuf, DownloadError> {
        let metadata = match retry_call(&self.retry, || self.service.table_metadata(&self.table_id))
            .await
        {
            Ok(metadata) => metadata,
            Err(TableServiceError::NotFound(_)) => {
                if let Err(err) = self
                    .log_store
                    .delete_survey_mapping(&self.app_id, &self.table_id)
                    .await
                {
                    warn!(
                        table_id = %self.table_id,
                        error = %err,
                        "failed to delete stale survey table mapping"
                    );
                }
                return Err(DownloadError::SurveyTableGone {
                    table_id: self.table_id,
                });
            }
            Err(source) => {
                return Err(DownloadError::Metadata {
                    table_id: self.table_id,
                    source,
                })
            }
        };

        let survey_path = self.work_dir.join(format!("{}.csv", metadata.name));
        let started = Instant::now();
        let result = self.download_survey(&survey_path).await;
        if let Err(err) = result {
            // Delete whatever was partially written before propagating.
            if survey_path.exists() {
                if let Err(remove_err) = std::fs::remove_file(&survey_path) {
                    warn!(
                        path = %survey_path.display(),
                        error = %remove_err,
                        "failed to delete partial survey file"
                    );
                }
            }
            return Err(err);
        }

        info!(
            table_id = %self.table_id,
            path = %survey_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "downloaded survey table"
        );
        Ok(survey_path)
    }

    async fn download_survey(&self, dest: &Path) -> Result<(), DownloadError> {
        // The whole table, no filter.
        let sql = format!("SELECT * FROM {}", self.table_id);
        let job = QueryJob {
            service: &*self.service,
            query: TableQuery::new(&self.table_id, sql),
        };
        let file_ref = self
            .poller
            .run(&job)
            .await
            .map_err(|source| DownloadError::Query {
                table_id: self.table_id.clone(),
                source,
            })?;

        retry_call(&self.retry, || self.service.download_file(&file_ref, dest))
            .await
            .map_err(|source| DownloadError::Download {
                path: dest.display().to_string(),
                source,
            })
    }
}
