use async_trait::async_trait;
use tracing::info;

use belfry_core::BelfryError;
use belfry_executor::{HandlerContext, JobHandler};

/// Built-in handler that logs its payload — useful for smoke-testing an
/// install before real handlers are registered.
pub struct LogMessageHandler;

#[async_trait]
impl JobHandler for LogMessageHandler {
    fn name(&self) -> &str {
        "log-message"
    }

    async fn run(&self, ctx: HandlerContext) -> Result<(), BelfryError> {
        let message = ctx
            .payload
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        info!(
            job_id = %ctx.job_id,
            attempt = ctx.attempt_number,
            "{message}"
        );
        Ok(())
    }
}
