//! Integration tests for the table and survey download tasks

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use study_export_worker::download::{
    DownloadError, DownloadParameters, ExportSchema, SurveyDownloadTask, TableDownloadTask,
};
use study_export_worker::store::LogStore;
use study_export_worker::table::poller::{JobPoller, RetryPolicy, WaitPlan};
use study_export_worker::table::{EntrySummary, TableService, TableServiceError};

use crate::common::mocks::{MockLogStore, MockTableService};

const TABLE_ID: &str = "syn123";
const SCHEMA_KEY: &str = "test-schema-v1";

fn schema() -> ExportSchema {
    ExportSchema::new(
        SCHEMA_KEY,
        HashMap::from([
            ("foo".to_string(), "int".to_string()),
            ("bar".to_string(), "attachment_blob".to_string()),
        ]),
    )
}

fn params(work_dir: &Path) -> DownloadParameters {
    DownloadParameters::builder()
        .table_id(TABLE_ID)
        .health_code("HC-1")
        .start_date(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())
        .end_date(NaiveDate::from_ymd_opt(2026, 1, 31).unwrap())
        .work_dir(work_dir)
        .schema(schema())
        .build()
        .unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 2,
        delay: Duration::ZERO,
    }
}

fn task(
    service: &Arc<MockTableService>,
    log_store: &Arc<MockLogStore>,
    work_dir: &Path,
) -> TableDownloadTask {
    let poller = JobPoller::new(WaitPlan::explicit(vec![Duration::ZERO; 3]))
        .with_retry_policy(fast_retry());
    TableDownloadTask::new(
        params(work_dir),
        service.clone() as Arc<dyn TableService>,
        log_store.clone() as Arc<dyn LogStore>,
        poller,
        fast_retry(),
    )
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_header_only_table_yields_empty_result_and_no_files() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_csv(TABLE_ID, "recordId,healthCode,foo,bar\n");

    let result = task(&service, &log_store, work_dir.path()).run().await.unwrap();

    assert!(result.is_empty());
    assert!(files_in(work_dir.path()).is_empty());
}

#[tokio::test]
async fn test_redaction_replaces_references_and_blanks_health_codes() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_csv(TABLE_ID, "healthCode,foo,bar\nHC-1,13,\nHC-1,7,fh-1\n");
    service.set_summaries(
        TABLE_ID,
        vec![EntrySummary {
            reference_id: "fh-1".to_string(),
            entry_name: Some("zip-entry-1".to_string()),
            failure_message: None,
        }],
    );

    let result = task(&service, &log_store, work_dir.path()).run().await.unwrap();

    let csv_file = result.csv_file.unwrap();
    assert_eq!(csv_file.file_name().unwrap(), format!("{SCHEMA_KEY}.csv").as_str());
    let contents = std::fs::read_to_string(&csv_file).unwrap();
    assert_eq!(contents, "healthCode,foo,bar\n,13,\n,7,zip-entry-1\n");

    let bundle_file = result.bundle_file.unwrap();
    assert_eq!(bundle_file.file_name().unwrap(), format!("{SCHEMA_KEY}.zip").as_str());
    assert!(bundle_file.exists());
}

#[tokio::test]
async fn test_rewrite_uses_failure_message_or_placeholder() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_csv(
        TABLE_ID,
        "healthCode,foo,bar\nHC-1,1,fh-err\nHC-1,2,fh-unknown\n",
    );
    service.set_summaries(
        TABLE_ID,
        vec![EntrySummary {
            reference_id: "fh-err".to_string(),
            entry_name: None,
            failure_message: Some("attachment corrupt".to_string()),
        }],
    );

    let result = task(&service, &log_store, work_dir.path()).run().await.unwrap();

    let contents = std::fs::read_to_string(result.csv_file.unwrap()).unwrap();
    // Each raw reference id is replaced by exactly one of: entry name,
    // recorded failure message, or the fixed placeholder.
    assert!(!contents.contains("fh-err"));
    assert!(!contents.contains("fh-unknown"));
    assert!(contents.contains("attachment corrupt"));
    assert!(contents.contains("Unknown error downloading attachment"));
}

#[tokio::test]
async fn test_no_attachment_columns_skips_bulk_resolution() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    // "bar" is absent: only plain columns remain.
    service.set_csv(TABLE_ID, "healthCode,foo\nHC-1,13\n");

    let result = task(&service, &log_store, work_dir.path()).run().await.unwrap();

    assert!(result.bundle_file.is_none());
    let contents = std::fs::read_to_string(result.csv_file.unwrap()).unwrap();
    assert_eq!(contents, "healthCode,foo\n,13\n");
}

#[tokio::test]
async fn test_blank_reference_cells_skip_bulk_resolution() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_csv(TABLE_ID, "healthCode,foo,bar\nHC-1,13,\n");

    let result = task(&service, &log_store, work_dir.path()).run().await.unwrap();

    assert!(result.bundle_file.is_none());
    assert!(result.csv_file.is_some());
}

#[tokio::test]
async fn test_vanished_table_deletes_stale_mapping() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_query_error(TABLE_ID, TableServiceError::NotFound(TABLE_ID.to_string()));

    let err = task(&service, &log_store, work_dir.path()).run().await.unwrap_err();

    assert!(matches!(err, DownloadError::TableGone { .. }));
    assert_eq!(
        *log_store.deleted_table_mappings.lock().unwrap(),
        vec![SCHEMA_KEY.to_string()]
    );
    assert!(files_in(work_dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_health_code_column_is_typed_error() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_csv(TABLE_ID, "recordId,foo,bar\nr-1,13,fh-1\n");

    let err = task(&service, &log_store, work_dir.path()).run().await.unwrap_err();

    assert!(matches!(err, DownloadError::MissingHealthCodeColumn { .. }));
    // The downloaded file was cleaned up on the way out.
    assert!(files_in(work_dir.path()).is_empty());
}

#[tokio::test]
async fn test_bulk_resolve_failure_cleans_up_downloaded_csv() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_csv(TABLE_ID, "healthCode,foo,bar\nHC-1,7,fh-1\n");
    service.set_bulk_error(TABLE_ID, TableServiceError::NotFound("bundle".to_string()));

    let err = task(&service, &log_store, work_dir.path()).run().await.unwrap_err();

    assert!(matches!(err, DownloadError::BulkResolve { .. }));
    assert!(files_in(work_dir.path()).is_empty());
}

#[tokio::test]
async fn test_unavailable_service_is_detectable_from_the_error() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_query_error(
        TABLE_ID,
        TableServiceError::Unavailable("read-only window".to_string()),
    );

    let err = task(&service, &log_store, work_dir.path()).run().await.unwrap_err();

    assert!(err.is_service_unavailable());
}

#[tokio::test]
async fn test_survey_download_uses_display_name() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_metadata("syn-survey", "Background Survey");
    service.set_csv("syn-survey", "question,answer\nq1,a1\n");

    let poller = JobPoller::new(WaitPlan::explicit(vec![Duration::ZERO; 3]))
        .with_retry_policy(fast_retry());
    let survey_task = SurveyDownloadTask::new(
        "test-app",
        "syn-survey",
        work_dir.path(),
        service.clone() as Arc<dyn TableService>,
        log_store.clone() as Arc<dyn LogStore>,
        poller,
        fast_retry(),
    );
    let path = survey_task.run().await.unwrap();

    assert_eq!(path.file_name().unwrap(), "Background Survey.csv");
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "question,answer\nq1,a1\n"
    );
}

#[tokio::test]
async fn test_vanished_survey_table_deletes_stale_mapping() {
    let service = Arc::new(MockTableService::new());
    let log_store = Arc::new(MockLogStore::new());
    let work_dir = tempfile::tempdir().unwrap();
    service.set_metadata_error(
        "syn-survey",
        TableServiceError::NotFound("syn-survey".to_string()),
    );

    let poller = JobPoller::new(WaitPlan::explicit(vec![Duration::ZERO; 3]))
        .with_retry_policy(fast_retry());
    let survey_task = SurveyDownloadTask::new(
        "test-app",
        "syn-survey",
        work_dir.path(),
        service.clone() as Arc<dyn TableService>,
        log_store.clone() as Arc<dyn LogStore>,
        poller,
        fast_retry(),
    );
    let err = survey_task.run().await.unwrap_err();

    assert!(matches!(err, DownloadError::SurveyTableGone { .. }));
    assert_eq!(
        *log_store.deleted_survey_mappings.lock().unwrap(),
        vec![("test-app".to_string(), "syn-survey".to_string())]
    );
    assert!(files_in(work_dir.path()).is_empty());
}
