//! Rows accumulated per destination table during one request

use std::collections::HashMap;

use crate::table::Row;

/// Rows grouped by destination table id, in arrival order per table.
///
/// Keys are created lazily as records touch tables; cardinality is bounded
/// by the number of distinct destination tables one request can reach (the
/// app-wide table plus per-study tables and optional demographics tables).
#[derive(Debug, Default)]
pub struct AppendBatch {
    rows_by_table: HashMap<String, Vec<Row>>,
}

impl AppendBatch {
    /// Add one row for a destination table.
    pub fn add(&mut self, table_id: &str, row: Row) {
        self.rows_by_table
            .entry(table_id.to_string())
            .or_default()
            .push(row);
    }

    /// Number of destination tables with at least one row.
    pub fn num_tables(&self) -> usize {
        self.rows_by_table.len()
    }

    /// Total rows across all tables.
    pub fn total_rows(&self) -> usize {
        self.rows_by_table.values().map(Vec::len).sum()
    }

    /// Whether no rows were accumulated at all.
    pub fn is_empty(&self) -> bool {
        self.rows_by_table.is_empty()
    }

    /// Rows for one table, if any.
    pub fn rows_for(&self, table_id: &str) -> Option<&[Row]> {
        self.rows_by_table.get(table_id).map(Vec::as_slice)
    }

    /// Consume the batch into its per-table row lists.
    pub fn into_inner(self) -> HashMap<String, Vec<Row>> {
        self.rows_by_table
    }
}
