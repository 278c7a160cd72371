use thiserror::Error;

/// Platform-wide error taxonomy.
///
/// Validation errors (`InvalidTrigger`, `DuplicateJob`, `Throttled`) are
/// returned synchronously to API callers and never enter the execution
/// pipeline. `ClaimConflict` is expected under multi-replica operation and
/// is logged at debug level, not surfaced to operators.
#[derive(Debug, Error)]
pub enum BelfryError {
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("duplicate job: {job_id}")]
    DuplicateJob { job_id: String },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("lost claim race for job {job_id}")]
    ClaimConflict { job_id: String },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("handler exceeded deadline after {ms}ms")]
    Timeout { ms: u64 },

    #[error("lease lost: fence token {fence} is stale")]
    LeaseLost { fence: i64 },

    #[error("submission rate limit exceeded ({per_minute}/min)")]
    Throttled { per_minute: u32 },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BelfryError {
    /// Short error code string for API responses and notification payloads.
    pub fn code(&self) -> &'static str {
        match self {
            BelfryError::InvalidTrigger(_) => "INVALID_TRIGGER",
            BelfryError::DuplicateJob { .. } => "DUPLICATE_JOB",
            BelfryError::JobNotFound { .. } => "JOB_NOT_FOUND",
            BelfryError::ExecutionNotFound { .. } => "EXECUTION_NOT_FOUND",
            BelfryError::ClaimConflict { .. } => "CLAIM_CONFLICT",
            BelfryError::Handler(_) => "HANDLER_ERROR",
            BelfryError::Timeout { .. } => "TIMEOUT",
            BelfryError::LeaseLost { .. } => "LEASE_LOST",
            BelfryError::Throttled { .. } => "THROTTLED",
            BelfryError::Database(_) => "DATABASE_ERROR",
            BelfryError::Serialization(_) => "SERIALIZATION_ERROR",
            BelfryError::Config(_) => "CONFIG_ERROR",
            BelfryError::Io(_) => "IO_ERROR",
            BelfryError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors that drive the retry state machine rather than
    /// aborting the pipeline (handler failures and deadline expiries are
    /// treated identically for retry purposes).
    pub fn is_retryable(&self) -> bool {
        matches!(self, BelfryError::Handler(_) | BelfryError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, BelfryError>;
