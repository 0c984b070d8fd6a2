// SPDX-License-Identifier: MIT

//! Centralized environment variable access for the daemon crate (spec.md
//! §6, "Environment variables consumed"). One function per variable, with a
//! documented default.

use std::path::PathBuf;
use std::time::Duration;

/// `MAX_CONCURRENT_JOBS`, clamped to ≥ 1. Default 2.
pub fn max_concurrent_limit() -> u32 {
    parsed_or("MAX_CONCURRENT_JOBS", 2).max(1)
}

/// `HEARTBEAT_TIMEOUT_SECONDS`. Default 10s.
pub fn heartbeat_timeout() -> Duration {
    Duration::from_secs(parsed_or("HEARTBEAT_TIMEOUT_SECONDS", 10))
}

/// `CLEANUP_INTERVAL_HOURS`. Default 2h.
pub fn cleanup_interval() -> Duration {
    Duration::from_secs(parsed_or::<u64>("CLEANUP_INTERVAL_HOURS", 2) * 3600)
}

/// `CLEANUP_MAX_AGE_HOURS`. Default 2h.
pub fn cleanup_max_age() -> Duration {
    Duration::from_secs(parsed_or::<u64>("CLEANUP_MAX_AGE_HOURS", 2) * 3600)
}

/// `UPLOADS_DIR`. Default `./uploads` (masks live under this directory too,
/// per spec.md §6).
pub fn uploads_dir() -> PathBuf {
    std::env::var("UPLOADS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./uploads"))
}

/// `RESULTS_DIR`. Default `./results`.
pub fn results_dir() -> PathBuf {
    std::env::var("RESULTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./results"))
}

/// `PORT`. Unused by the in-scope core beyond being readable for a
/// `/status`-equivalent report; the HTTP listener itself is out of scope.
/// Default 8787.
pub fn port() -> u16 {
    parsed_or("PORT", 8787)
}

/// `WORKER_INTERPRETER`. The interpreter the Worker Invoker spawns every
/// stage script under. Default `python3`.
pub fn worker_interpreter() -> String {
    std::env::var("WORKER_INTERPRETER").unwrap_or_else(|_| "python3".to_string())
}

fn parsed_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
