//! Maintenance run reporting.
//!
//! Wraps a maintenance task body with begin/end logging and records the
//! terminal error. The wrapper never swallows the result; callers get the
//! body's return value unchanged.

use std::fmt;
use std::time::Instant;

use tracing::{error, info};

/// Task name for snapshot garbage collection runs.
pub const TASK_SNAPSHOT_GC: &str = "snapshot-gc";

/// Runs a maintenance task body, logging start, completion and failure.
pub fn report_run<T, E, F>(task: &str, body: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    info!(task, "maintenance task starting");
    let started = Instant::now();

    let result = body();

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => info!(task, elapsed_ms, "maintenance task finished"),
        Err(err) => error!(task, elapsed_ms, "maintenance task failed: {err}"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_success_and_failure() {
        let ok: Result<u32, String> = report_run("test-task", || Ok(42));
        assert_eq!(ok.unwrap(), 42);

        let err: Result<u32, String> = report_run("test-task", || Err("boom".to_owned()));
        assert_eq!(err.unwrap_err(), "boom");
    }
}
