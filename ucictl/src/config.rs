//! Runtime defaults for ucictl.
//!
//! Every value has a compile-time default and can be overridden through a
//! dedicated environment variable. Command-line flags take precedence over
//! both.

use std::path::PathBuf;
use std::time::Duration;

/// Engine launched when neither `--engine` nor `UCICTL_ENGINE` is given.
/// Resolved through `PATH`.
const DEFAULT_ENGINE: &str = "stockfish";

/// Default grace period for the engine to exit after `quit` (in seconds).
const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;

/// Get the engine executable.
///
/// Priority:
/// 1. `UCICTL_ENGINE` env variable if set
/// 2. `stockfish` as fallback
pub fn get_engine_path() -> PathBuf {
    if let Ok(path) = std::env::var("UCICTL_ENGINE") {
        return PathBuf::from(path);
    }

    PathBuf::from(DEFAULT_ENGINE)
}

/// Get the close grace period.
///
/// Priority:
/// 1. `UCICTL_CLOSE_TIMEOUT_SECS` env variable if set (falls back to default
///    if the value cannot be parsed as a `u64`)
/// 2. `5` seconds as fallback
pub fn get_close_timeout() -> Duration {
    let secs = std::env::var("UCICTL_CLOSE_TIMEOUT_SECS")
        .ok()
        .map_or(DEFAULT_CLOSE_TIMEOUT_SECS, |v| parse_secs(&v));
    Duration::from_secs(secs)
}

fn parse_secs(value: &str) -> u64 {
    value.trim().parse().unwrap_or(DEFAULT_CLOSE_TIMEOUT_SECS)
}
