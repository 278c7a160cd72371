use thiserror::Error;

/// Errors produced by schedule arithmetic.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The cron expression does not parse.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// The timezone name is not a known IANA identifier.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The trigger or window is structurally invalid (zero interval,
    /// inverted business-hours window, …).
    #[error("invalid schedule: {0}")]
    InvalidSpec(String),
}

impl From<ScheduleError> for belfry_core::BelfryError {
    fn from(e: ScheduleError) -> Self {
        belfry_core::BelfryError::InvalidTrigger(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
