//! Logging setup for applications and tests.

use tracing_subscriber::EnvFilter;

/// Sets up logging of events reported by the context and its workers.
///
/// Use the RUST_LOG environment variable to override the defaults.
///
/// E.g. To enable debug level logging:
///   RUST_LOG=DEBUG
///
/// Or to only see what the workers are up to:
///   RUST_LOG=resolv_ctx::worker=TRACE
///
/// Calling this more than once is harmless. Forked worker processes never
/// log.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .with_thread_names(true)
        .without_time()
        .try_init()
        .ok();
}
