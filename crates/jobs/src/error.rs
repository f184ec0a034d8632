// crates/jobs/src/error.rs
//! Error types for job orchestration.

use thiserror::Error;

/// Errors surfaced by the job supervisor.
///
/// Read failures on a child's stdout are deliberately absent: the drain
/// worker treats them as end-of-stream and stops, which is not an error the
/// caller can act on.
#[derive(Debug, Error)]
pub enum JobError {
    /// The mining process could not be spawned or fed its input.
    /// No registry entry exists for the failed launch.
    #[error("failed to start mining process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// A status poll referenced an id that was never issued (or was evicted).
    #[error("unknown job id: {0}")]
    UnknownJob(String),
}
