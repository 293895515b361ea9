//! Logging initialization for the worker's composition root

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with optional JSON formatting.
///
/// The filter defaults to `study_export_worker=info` and can be overridden
/// via `RUST_LOG`. Setting `LOG_FORMAT=json` switches to JSON output for log
/// aggregation. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("study_export_worker=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .ok();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .ok();
    }
}
