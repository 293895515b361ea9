//! Mutable per-task state for a table download

use std::path::PathBuf;

use crate::download::columns::ColumnClassification;
use crate::table::EntrySummary;

/// Everything a [`crate::download::TableDownloadTask`] accumulates while it
/// runs. Owned exclusively by the task that created it and discarded with
/// the task, so no synchronization is needed.
#[derive(Debug, Default)]
pub(crate) struct DownloadContext {
    /// Query result downloaded from the table service.
    pub csv_file: Option<PathBuf>,
    /// Classification of the result's header row.
    pub classification: Option<ColumnClassification>,
    /// Deduplicated attachment reference ids found in the result.
    pub reference_ids: std::collections::HashSet<String>,
    /// Downloaded bundle of resolved attachments.
    pub bundle_file: Option<PathBuf>,
    /// Per-reference resolution outcomes from the bulk-resolve job.
    pub summaries: Vec<EntrySummary>,
    /// Rewritten copy of the result, before it replaces the original.
    pub rewritten_file: Option<PathBuf>,
}

impl DownloadContext {
    /// Every file the task may have created, for cleanup.
    pub fn files_to_delete(&self) -> impl Iterator<Item = &PathBuf> {
        self.csv_file
            .iter()
            .chain(self.bundle_file.iter())
            .chain(self.rewritten_file.iter())
    }
}
