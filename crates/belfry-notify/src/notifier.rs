use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use belfry_core::event::JobEvent;

use crate::error::NotifyError;

/// A single outbound transport (webhook, log, message bus, …).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one event. Errors are the transport's problem to describe
    /// and the service's problem to log — never the scheduler's.
    async fn notify(&self, event: &JobEvent) -> Result<(), NotifyError>;
}

/// Fans each event out to every configured transport.
///
/// Delivery runs on detached tasks so a slow endpoint can never stall the
/// fire-loop or a worker.
#[derive(Default)]
pub struct NotificationService {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Best-effort fan-out. Fire-and-forget: failures are logged per
    /// transport and swallowed.
    pub fn notify(&self, event: JobEvent) {
        for notifier in &self.notifiers {
            let notifier = Arc::clone(notifier);
            let event = event.clone();
            tokio::spawn(async move {
                match notifier.notify(&event).await {
                    Ok(()) => {
                        debug!(
                            transport = %notifier.name(),
                            job_id = %event.job_id,
                            kind = %event.kind,
                            "notification delivered"
                        );
                    }
                    Err(e) => {
                        warn!(
                            transport = %notifier.name(),
                            job_id = %event.job_id,
                            kind = %event.kind,
                            error = %e,
                            "notification delivery failed — dropped"
                        );
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_core::event::JobEventKind;
    use belfry_core::types::JobExecution;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Notifier for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn notify(&self, _event: &JobEvent) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Status(503))
        }
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut service = NotificationService::new();
        service.add(Arc::new(Flaky {
            calls: calls.clone(),
        }));

        let exec = JobExecution::new_pending("j", chrono::Utc::now(), 1);
        // Must not panic or propagate the transport error.
        service.notify(JobEvent::from_execution(JobEventKind::Failed, &exec));

        // Let the detached delivery task run.
        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
