//! Runs every download task for one request and packages the results
//!
//! The packager fans one request out into a [`TableDownloadTask`] per data
//! table and a [`SurveyDownloadTask`] per survey table, all on a bounded
//! worker pool. Task failures are isolated: each is recorded into an error
//! log that ships inside the final archive. Only the table service declaring
//! itself unavailable aborts the whole request.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ExporterConfig;
use crate::download::archive::zip_files;
use crate::download::params::{DownloadParameters, ExportSchema};
use crate::download::survey_task::SurveyDownloadTask;
use crate::download::table_task::TableDownloadTask;
use crate::download::{DownloadError, DownloadResult, PackageError};
use crate::store::{BlobStore, LogStore, SignedUrlInfo};
use crate::table::poller::JobPoller;
use crate::table::TableService;
use crate::worker::pool::WorkerPool;

/// Error log for failed table downloads, shipped inside the archive.
const ERROR_LOG_FILE_NAME: &str = "error.log";

/// Error log for failed survey downloads, kept separate so users can tell
/// data failures from survey-metadata failures.
const METADATA_ERROR_LOG_FILE_NAME: &str = "metadata-error.log";

/// Everything one packaging run needs to know.
#[derive(Debug, Clone)]
pub struct PackageRequest {
    /// App the requesting account belongs to.
    pub app_id: String,
    /// Health code whose data is being packaged.
    pub health_code: String,
    /// First upload date to include.
    pub start_date: NaiveDate,
    /// Last upload date to include (inclusive).
    pub end_date: NaiveDate,
    /// Data tables to query, keyed by table id.
    pub schemas_by_table: HashMap<String, ExportSchema>,
    /// Survey tables to dump in their entirety.
    pub survey_table_ids: HashSet<String>,
}

/// Files created during one packaging run, tracked so the final cleanup can
/// delete them on every exit path.
#[derive(Debug, Default)]
struct PackageState {
    all_files: Vec<PathBuf>,
    master_zip: Option<PathBuf>,
}

/// Orchestrates one request's downloads into a single uploaded archive.
pub struct DownloadPackager {
    service: Arc<dyn TableService>,
    blob_store: Arc<dyn BlobStore>,
    log_store: Arc<dyn LogStore>,
    pool: WorkerPool,
    config: ExporterConfig,
}

impl DownloadPackager {
    /// Create a packager with explicit collaborators and worker pool.
    pub fn new(
        service: Arc<dyn TableService>,
        blob_store: Arc<dyn BlobStore>,
        log_store: Arc<dyn LogStore>,
        pool: WorkerPool,
        config: ExporterConfig,
    ) -> Self {
        Self {
            service,
            blob_store,
            log_store,
            pool,
            config,
        }
    }

    /// Package every table's data for one request.
    ///
    /// Returns `Ok(None)` when no data table produced any artifact; the
    /// caller should report "no data" to the user. Otherwise returns the
    /// signed URL of the uploaded archive.
    ///
    /// All collected files, the archive, and the working directory are
    /// deleted before this returns, whether it succeeds or fails.
    pub async fn package(
        &self,
        request: &PackageRequest,
    ) -> Result<Option<SignedUrlInfo>, PackageError> {
        let work_dir = tempfile::Builder::new()
            .prefix("userdata-")
            .tempdir()
            .map_err(|err| PackageError::Io(format!("failed to create work dir: {err}")))?;

        let mut state = PackageState::default();
        let outcome = self
            .package_inner(request, work_dir.path(), &mut state)
            .await;
        self.cleanup(&state, work_dir);
        outcome
    }

    async fn package_inner(
        &self,
        request: &PackageRequest,
        work_dir: &Path,
        state: &mut PackageState,
    ) -> Result<Option<SignedUrlInfo>, PackageError> {
        let table_handles = self.submit_table_tasks(request, work_dir)?;
        let survey_handles = self.submit_survey_tasks(request, work_dir);

        // Wait for every task and gather all files before deciding whether
        // there is any data; otherwise we would not know what to clean up.
        let mut unavailable = None;

        let mut table_files = Vec::new();
        let mut table_errors = Vec::new();
        for (table_id, handle) in table_handles {
            match handle.await {
                Ok(Ok(result)) => {
                    for file in [result.csv_file, result.bundle_file].into_iter().flatten() {
                        state.all_files.push(file.clone());
                        table_files.push(file);
                    }
                }
                Ok(Err(err)) => {
                    if err.is_service_unavailable() && unavailable.is_none() {
                        unavailable = Some(err.to_string());
                    }
                    let message = format!("Error downloading table {table_id}: {err}");
                    error!(table_id = %table_id, error = %err, "table download failed");
                    table_errors.push(message);
                }
                Err(join_err) => {
                    error!(table_id = %table_id, error = %join_err, "table download task died");
                    table_errors.push(format!("Error downloading table {table_id}: {join_err}"));
                }
            }
        }

        let mut survey_files = Vec::new();
        let mut survey_errors = Vec::new();
        for (table_id, handle) in survey_handles {
            match handle.await {
                Ok(Ok(path)) => {
                    state.all_files.push(path.clone());
                    survey_files.push(path);
                }
                Ok(Err(err)) => {
                    if err.is_service_unavailable() && unavailable.is_none() {
                        unavailable = Some(err.to_string());
                    }
                    let message = format!("Error downloading survey table {table_id}: {err}");
                    error!(table_id = %table_id, error = %err, "survey download failed");
                    survey_errors.push(message);
                }
                Err(join_err) => {
                    error!(table_id = %table_id, error = %join_err, "survey download task died");
                    survey_errors
                        .push(format!("Error downloading survey table {table_id}: {join_err}"));
                }
            }
        }

        if let Some(reason) = unavailable {
            // Not an isolated failure: the whole batch must be redelivered.
            return Err(PackageError::ServiceUnavailable(reason));
        }

        if table_files.is_empty() {
            // No underlying data at all, independent of survey results.
            info!(
                health_code = %request.health_code,
                "no data in any table for this request"
            );
            return Ok(None);
        }

        if !table_errors.is_empty() {
            let log = write_error_log(&table_errors, ERROR_LOG_FILE_NAME, work_dir)?;
            state.all_files.push(log.clone());
            table_files.push(log);
        }
        if !survey_errors.is_empty() {
            let log = write_error_log(&survey_errors, METADATA_ERROR_LOG_FILE_NAME, work_dir)?;
            state.all_files.push(log.clone());
            survey_files.push(log);
        }

        let mut all_files = table_files;
        all_files.extend(survey_files);

        // Unique, user-friendly, and free of identifying info.
        let master_name = format!(
            "userdata-{}-to-{}-{}.zip",
            request.start_date,
            request.end_date,
            Uuid::new_v4()
        );
        let master_path = work_dir.join(&master_name);

        let started = Instant::now();
        zip_files(&all_files, &master_path)?;
        state.master_zip = Some(master_path.clone());
        info!(
            path = %master_path.display(),
            num_files = all_files.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assembled master archive"
        );

        let started = Instant::now();
        self.blob_store
            .write_file(&self.config.userdata_bucket, &master_name, &master_path)
            .await?;
        info!(
            bucket = %self.config.userdata_bucket,
            key = %master_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "uploaded master archive"
        );

        let expires_at = Utc::now() + chrono::Duration::hours(self.config.url_expiration_hours);
        let url = self
            .blob_store
            .signed_url(&self.config.userdata_bucket, &master_name, expires_at)
            .await?;
        Ok(Some(SignedUrlInfo { url, expires_at }))
    }

    fn submit_table_tasks(
        &self,
        request: &PackageRequest,
        work_dir: &Path,
    ) -> Result<TaskHandles<DownloadResult>, PackageError> {
        let poller = JobPoller::new(self.config.query_wait_plan())
            .with_retry_policy(self.config.retry_policy());

        let mut handles = Vec::new();
        for (table_id, schema) in &request.schemas_by_table {
            let params = DownloadParameters::builder()
                .table_id(table_id)
                .health_code(&request.health_code)
                .start_date(request.start_date)
                .end_date(request.end_date)
                .work_dir(work_dir)
                .schema(schema.clone())
                .build()
                .map_err(|err| PackageError::InvalidRequest(err.to_string()))?;

            let task = TableDownloadTask::new(
                params,
                self.service.clone(),
                self.log_store.clone(),
                poller.clone(),
                self.config.retry_policy(),
            );
            handles.push((table_id.clone(), self.pool.spawn(task.run())));
        }
        Ok(handles)
    }

    fn submit_survey_tasks(
        &self,
        request: &PackageRequest,
        work_dir: &Path,
    ) -> TaskHandles<PathBuf> {
        let poller = JobPoller::new(self.config.query_wait_plan())
            .with_retry_policy(self.config.retry_policy());

        let mut handles = Vec::new();
        for table_id in &request.survey_table_ids {
            let task = SurveyDownloadTask::new(
                &request.app_id,
                table_id,
                work_dir,
                self.service.clone(),
                self.log_store.clone(),
                poller.clone(),
                self.config.retry_policy(),
            );
            handles.push((table_id.clone(), self.pool.spawn(task.run())));
        }
        handles
    }

    /// Delete every collected file, the master archive, and the working
    /// directory. Runs on every exit path of [`Self::package`].
    fn cleanup(&self, state: &PackageState, work_dir: TempDir) {
        for file in state.all_files.iter().chain(state.master_zip.iter()) {
            if !file.exists() {
                continue;
            }
            if let Err(err) = std::fs::remove_file(file) {
                warn!(path = %file.display(), error = %err, "failed to delete collected file");
            }
        }
        if let Err(err) = work_dir.close() {
            warn!(error = %err, "failed to remove work dir");
        }
    }
}

type TaskHandles<T> = Vec<(String, JoinHandle<Result<T, DownloadError>>)>;

/// Write the given error lines into an error-log file for the user, so they
/// know which parts of their request failed and can send the log back for
/// diagnosis.
fn write_error_log(
    errors: &[String],
    file_name: &str,
    work_dir: &Path,
) -> Result<PathBuf, PackageError> {
    let path = work_dir.join(file_name);
    std::fs::write(&path, errors.join("\n"))
        .map_err(|err| PackageError::Io(format!("failed to write {file_name}: {err}")))?;
    Ok(path)
}
