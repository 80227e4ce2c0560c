//! Shared logging initialization for harness consumers.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

/// Environment variable holding the log level.
pub const LOG_ENV: &str = "EBH_LOG";

fn parse_level(raw: Option<&str>) -> tracing::Level {
    match raw.unwrap_or("info").to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Initialize process-level tracing output from `EBH_LOG`.
///
/// Safe to call from every test; only the first call installs the
/// subscriber. Best-effort: a subscriber installed by someone else is left
/// in place and no error is returned.
pub fn init() {
    if INIT.get().is_some() {
        return;
    }
    let level = parse_level(std::env::var(LOG_ENV).ok().as_deref());
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_test_writer()
        .try_init();
    let _ = INIT.set(());
}
