use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Everything a handler gets for one invocation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub job_id: String,
    pub execution_id: String,
    /// The instant this fire was due (may lag `Utc::now()` on catch-up runs).
    pub scheduled_time: DateTime<Utc>,
    /// 1-based attempt counter.
    pub attempt_number: u32,
    /// Opaque JSON from the job definition.
    pub payload: serde_json::Value,
    /// Cooperative cancellation — long-running handlers should check this
    /// at safe points and return early. Ignoring it means a hard abort once
    /// the kill grace elapses.
    pub cancel: CancellationToken,
}

/// A unit of executable business logic, registered by name at startup.
///
/// Job definitions reference handlers by `name()`; unknown names are
/// rejected at job-creation time, never at fire time.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Run one attempt. An `Err` drives the retry state machine; the error
    /// text ends up on the execution row and in failure notifications.
    async fn run(&self, ctx: HandlerContext) -> Result<(), belfry_core::BelfryError>;
}
