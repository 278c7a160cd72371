use async_trait::async_trait;
use tracing::{info, warn};

use belfry_core::event::{JobEvent, JobEventKind};

use crate::error::NotifyError;
use crate::notifier::Notifier;

/// Always-on transport writing events to the process log.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &JobEvent) -> Result<(), NotifyError> {
        match event.kind {
            JobEventKind::Started | JobEventKind::Succeeded => {
                info!(
                    job_id = %event.job_id,
                    execution_id = %event.execution_id,
                    kind = %event.kind,
                    attempt = event.attempt_number,
                    "job event"
                );
            }
            JobEventKind::Failed | JobEventKind::DeadLettered => {
                warn!(
                    job_id = %event.job_id,
                    execution_id = %event.execution_id,
                    kind = %event.kind,
                    attempt = event.attempt_number,
                    error = event.error.as_deref().unwrap_or("unknown"),
                    "job event"
                );
            }
        }
        Ok(())
    }
}
