//! Integration tests for the download packager

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use chrono::NaiveDate;

use study_export_worker::config::ExporterConfig;
use study_export_worker::download::packager::{DownloadPackager, PackageRequest};
use study_export_worker::download::{ExportSchema, PackageError};
use study_export_worker::store::{BlobStore, LogStore};
use study_export_worker::table::{EntrySummary, TableService, TableServiceError};
use study_export_worker::worker::pool::WorkerPool;

use crate::common::mocks::{MockBlobStore, MockLogStore, MockTableService};

struct Harness {
    service: Arc<MockTableService>,
    blob_store: Arc<MockBlobStore>,
    log_store: Arc<MockLogStore>,
    packager: DownloadPackager,
}

fn harness() -> Harness {
    let service = Arc::new(MockTableService::new());
    let blob_store = Arc::new(MockBlobStore::new());
    let log_store = Arc::new(MockLogStore::new());
    let config = ExporterConfig {
        poll_interval_ms: 0,
        poll_max_tries: 3,
        rpc_retry_attempts: 2,
        rpc_retry_delay_ms: 0,
        ..ExporterConfig::default()
    };
    let packager = DownloadPackager::new(
        service.clone() as Arc<dyn TableService>,
        blob_store.clone() as Arc<dyn BlobStore>,
        log_store.clone() as Arc<dyn LogStore>,
        WorkerPool::new(4),
        config,
    );
    Harness {
        service,
        blob_store,
        log_store,
        packager,
    }
}

fn schema(key: &str) -> ExportSchema {
    ExportSchema::new(
        key,
        HashMap::from([
            ("foo".to_string(), "int".to_string()),
            ("bar".to_string(), "attachment_blob".to_string()),
        ]),
    )
}

fn request(tables: &[(&str, &str)], surveys: &[&str]) -> PackageRequest {
    PackageRequest {
        app_id: "test-app".to_string(),
        health_code: "HC-1".to_string(),
        start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        schemas_by_table: tables
            .iter()
            .map(|(table_id, key)| (table_id.to_string(), schema(key)))
            .collect(),
        survey_table_ids: surveys.iter().map(|s| s.to_string()).collect(),
    }
}

fn archive_entries(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    names.sort();
    names
}

fn archive_entry(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut contents = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    contents
}

#[tokio::test]
async fn test_packages_data_surveys_and_attachments_into_one_archive() {
    let h = harness();
    h.service
        .set_csv("syn-a", "healthCode,foo,bar\nHC-1,7,fh-1\n");
    h.service.set_summaries(
        "syn-a",
        vec![EntrySummary {
            reference_id: "fh-1".to_string(),
            entry_name: Some("zip-entry-1".to_string()),
            failure_message: None,
        }],
    );
    h.service.set_csv("syn-empty", "healthCode,foo,bar\n");
    h.service.set_metadata("syn-s", "Background Survey");
    h.service.set_csv("syn-s", "question,answer\nq1,a1\n");

    let info = h
        .packager
        .package(&request(
            &[("syn-a", "schema-a"), ("syn-empty", "schema-empty")],
            &["syn-s"],
        ))
        .await
        .unwrap()
        .expect("data was present");

    let (bucket, key, bytes) = h.blob_store.only_upload();
    assert_eq!(bucket, "study-userdata");
    assert!(key.starts_with("userdata-2026-03-01-to-2026-03-31-"));
    assert_eq!(info.url, format!("https://blob.test/study-userdata/{key}"));
    assert!(info.expires_at > chrono::Utc::now());

    let entries = archive_entries(&bytes);
    assert_eq!(
        entries,
        vec![
            "Background Survey.csv".to_string(),
            "schema-a.csv".to_string(),
            "schema-a.zip".to_string(),
        ]
    );

    // The packaged CSV is the redacted one.
    let contents = archive_entry(&bytes, "schema-a.csv");
    assert_eq!(contents, "healthCode,foo,bar\n,7,zip-entry-1\n");
}

#[tokio::test]
async fn test_failed_table_is_isolated_into_error_log() {
    let h = harness();
    h.service.set_csv("syn-a", "healthCode,foo,bar\nHC-1,7,\n");
    h.service
        .set_query_error("syn-b", TableServiceError::NotFound("syn-b".to_string()));

    let info = h
        .packager
        .package(&request(&[("syn-a", "schema-a"), ("syn-b", "schema-b")], &[]))
        .await
        .unwrap();

    assert!(info.is_some());
    let (_, _, bytes) = h.blob_store.only_upload();
    let entries = archive_entries(&bytes);
    assert!(entries.contains(&"schema-a.csv".to_string()));
    assert!(entries.contains(&"error.log".to_string()));

    let log = archive_entry(&bytes, "error.log");
    assert!(log.contains("syn-b"));
    assert!(log.contains("no longer exists"));
}

#[tokio::test]
async fn test_failed_survey_lands_in_separate_metadata_error_log() {
    let h = harness();
    h.service.set_csv("syn-a", "healthCode,foo,bar\nHC-1,7,\n");
    h.service.set_metadata_error(
        "syn-s",
        TableServiceError::NotFound("syn-s".to_string()),
    );

    let info = h
        .packager
        .package(&request(&[("syn-a", "schema-a")], &["syn-s"]))
        .await
        .unwrap();

    assert!(info.is_some());
    let (_, _, bytes) = h.blob_store.only_upload();
    let entries = archive_entries(&bytes);
    assert!(entries.contains(&"metadata-error.log".to_string()));
    assert!(!entries.contains(&"error.log".to_string()));
    assert!(archive_entry(&bytes, "metadata-error.log").contains("syn-s"));

    // Self-healing: the stale survey mapping was removed.
    assert_eq!(
        *h.log_store.deleted_survey_mappings.lock().unwrap(),
        vec![("test-app".to_string(), "syn-s".to_string())]
    );
}

#[tokio::test]
async fn test_no_table_data_returns_none_even_with_survey_data() {
    let h = harness();
    h.service.set_csv("syn-a", "healthCode,foo,bar\n");
    h.service.set_metadata("syn-s", "Background Survey");
    h.service.set_csv("syn-s", "question,answer\nq1,a1\n");

    let info = h
        .packager
        .package(&request(&[("syn-a", "schema-a")], &["syn-s"]))
        .await
        .unwrap();

    assert!(info.is_none());
    assert!(h.blob_store.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unavailable_service_short_circuits_the_batch() {
    let h = harness();
    h.service.set_csv("syn-a", "healthCode,foo,bar\nHC-1,7,\n");
    h.service.set_query_error(
        "syn-b",
        TableServiceError::Unavailable("maintenance window".to_string()),
    );

    let err = h
        .packager
        .package(&request(&[("syn-a", "schema-a"), ("syn-b", "schema-b")], &[]))
        .await
        .unwrap_err();

    assert!(matches!(err, PackageError::ServiceUnavailable(_)));
    assert!(h.blob_store.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_failure_propagates_after_cleanup() {
    let h = harness();
    h.service.set_csv("syn-a", "healthCode,foo,bar\nHC-1,7,\n");
    h.blob_store.fail_writes();

    let err = h
        .packager
        .package(&request(&[("syn-a", "schema-a")], &[]))
        .await
        .unwrap_err();

    assert!(matches!(err, PackageError::Store(_)));
}
