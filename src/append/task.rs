//! One-shot task: append a row batch to one destination table

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::append::AppendError;
use crate::table::poller::{JobPoller, PollError};
use crate::table::{AppendJob, Row, TableService};

/// Submits one table's accumulated rows and polls for the write
/// acknowledgment.
pub struct TableAppendTask {
    table_id: String,
    rows: Vec<Row>,
    service: Arc<dyn TableService>,
    poller: JobPoller,
}

impl TableAppendTask {
    /// Create a task appending `rows` to `table_id`.
    pub fn new(
        table_id: impl Into<String>,
        rows: Vec<Row>,
        service: Arc<dyn TableService>,
        poller: JobPoller,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            rows,
            service,
            poller,
        }
    }

    /// Run the append and verify the written row count.
    ///
    /// A written-count mismatch is logged but does not fail the task. A
    /// timeout is scoped to this table only.
    pub async fn run(self) -> Result<(), AppendError> {
        let num_rows = self.rows.len();
        let started = Instant::now();

        let job = AppendJob {
            service: &*self.service,
            table_id: &self.table_id,
            rows: &self.rows,
        };
        let receipt = self.poller.run(&job).await.map_err(|err| match err {
            PollError::Timeout { tries } => AppendError::Timeout {
                table_id: self.table_id.clone(),
                tries,
            },
            PollError::Service(source) => AppendError::Service {
                table_id: self.table_id.clone(),
                source,
            },
        })?;

        if receipt.row_ids.len() != num_rows {
            // Non-fatal; the discrepancy is surfaced for investigation.
            error!(
                table_id = %self.table_id,
                expected = num_rows,
                written = receipt.row_ids.len(),
                "append wrote a different number of rows than submitted"
            );
        }

        info!(
            table_id = %self.table_id,
            num_rows = num_rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "appended rows to table"
        );
        Ok(())
    }
}
