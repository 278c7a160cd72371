use thiserror::Error;

/// Errors that can occur within the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// INSERT hit an existing job_id.
    #[error("duplicate job: {job_id}")]
    DuplicateJob { job_id: String },

    /// No job with the given ID exists in the store.
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// No execution (or DLQ entry) with the given ID exists.
    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    /// Lost the race to claim a due job. Expected under multi-replica
    /// operation; callers log at debug and move on.
    #[error("lost claim race for job {job_id}")]
    ClaimConflict { job_id: String },

    /// A write carried a fence token older than the row's current claim —
    /// the writer was deposed as leader.
    #[error("stale fence token {fence} (row is at {current})")]
    StaleFence { fence: i64, current: i64 },

    /// A stored JSON column failed to round-trip.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp or enum string is unreadable.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for belfry_core::BelfryError {
    fn from(e: StoreError) -> Self {
        use belfry_core::BelfryError;
        match e {
            StoreError::DuplicateJob { job_id } => BelfryError::DuplicateJob { job_id },
            StoreError::JobNotFound { job_id } => BelfryError::JobNotFound { job_id },
            StoreError::ExecutionNotFound { execution_id } => {
                BelfryError::ExecutionNotFound { execution_id }
            }
            StoreError::ClaimConflict { job_id } => BelfryError::ClaimConflict { job_id },
            StoreError::StaleFence { fence, .. } => BelfryError::LeaseLost { fence },
            StoreError::Serialization(e) => BelfryError::Serialization(e),
            other => BelfryError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
