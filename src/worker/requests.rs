//! Queue request payloads
//!
//! Requests arrive from the queue layer as raw JSON. Parsing failures are
//! [`WorkerError::BadRequest`] so the queue layer dead-letters the message
//! instead of redelivering it forever.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::worker::WorkerError;

/// A user-data download request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// App the requesting account belongs to.
    pub app_id: String,
    /// Requesting user.
    pub user_id: String,
    /// First upload date to include.
    pub start_date: NaiveDate,
    /// Last upload date to include.
    pub end_date: NaiveDate,
}

/// A participant-record append request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    /// App whose participant records should be appended.
    pub app_id: String,
}

/// Parse a queue message body into a typed request.
pub fn parse_request<T: DeserializeOwned>(body: &serde_json::Value) -> Result<T, WorkerError> {
    serde_json::from_value(body.clone())
        .map_err(|err| WorkerError::BadRequest(format!("Error parsing request: {err}")))
}
