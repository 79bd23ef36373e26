//! Fatal startup errors, distinct from the per-command `OpErrorCode`
//! taxonomy that flows into the run report (§7).
//!
//! These abort the whole invocation before any step runs; the CLI maps them
//! to exit code 1 via `tracing::error!` + `anyhow`, never recording them in
//! `manifest.json`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("pipeline descriptor invalid: {0}")]
    PipelineInvalid(String),
    #[error("failed to create history run directory after {attempts} attempts")]
    FailedToCreateHistoryRunId { attempts: u32 },
    #[error("history run id collided with an existing run directory")]
    HistoryRunIdCollision,
    #[error("history I/O error: {0}")]
    History(String),
    #[error("workers must be >= 1, got {0}")]
    InvalidWorkers(u32),
}
