use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use belfry_core::types::{ExecutionState, JobDefinition, JobExecution};
use belfry_core::BelfryError;
use belfry_store::StateStore;

use crate::handler::HandlerContext;
use crate::registry::HandlerRegistry;

const PERSIST_ATTEMPTS: u32 = 5;
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Result of driving one attempt to completion.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub execution: JobExecution,
    /// True when the handler was never invoked (misfire drop, missing
    /// handler); such attempts must not consume retry budget.
    pub handler_invoked: bool,
}

/// Runs claimed jobs: concurrency gate, misfire policy, deadline,
/// cooperative-then-forced cancellation, durable outcome recording.
pub struct JobExecutor {
    registry: Arc<HandlerRegistry>,
    store: Arc<StateStore>,
    /// Recorded on execution rows; also the lease holder id on the leader.
    worker_id: String,
    /// How long a cancelled handler gets to wind down before a hard abort.
    kill_grace: Duration,
    /// In-process slot counter per job_id backing `try_claim`.
    slots: DashMap<String, u32>,
    /// Live cancellation tokens keyed by execution_id.
    active: DashMap<String, CancellationToken>,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        store: Arc<StateStore>,
        worker_id: String,
        kill_grace: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            worker_id,
            kill_grace,
            slots: DashMap::new(),
            active: DashMap::new(),
        }
    }

    /// Reserve a run slot for this job. Fails closed: any doubt about the
    /// current active count means no claim.
    ///
    /// Checks both the in-process counter (authoritative within the leader)
    /// and the store's claimed/running rows (covers attempts recorded by a
    /// previous incarnation whose claim has not lapsed yet).
    pub fn try_claim(&self, job: &JobDefinition) -> bool {
        let mut slot = self.slots.entry(job.job_id.clone()).or_insert(0);
        if *slot >= job.max_instances {
            return false;
        }
        let db_active = match self.store.count_active(&job.job_id) {
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "active-count query failed, claim denied");
                return false;
            }
        };
        if db_active >= job.max_instances {
            return false;
        }
        *slot += 1;
        true
    }

    fn release_slot(&self, job_id: &str) {
        if let Some(mut slot) = self.slots.get_mut(job_id) {
            *slot = slot.saturating_sub(1);
        }
    }

    /// Cooperatively cancel a running execution. Returns false when the
    /// execution is not currently active on this node.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.active.get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of executions currently running on this node.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Drive one claimed attempt to a terminal-or-failed state.
    ///
    /// The caller must hold a slot from [`try_claim`]; the slot is released
    /// on every exit path. The handler deadline is derived from the job's
    /// misfire grace.
    pub async fn execute(
        &self,
        job: &JobDefinition,
        mut exec: JobExecution,
        fence: i64,
    ) -> Result<ExecutionOutcome, BelfryError> {
        let result = self.execute_inner(job, &mut exec, fence).await;
        self.release_slot(&job.job_id);
        self.active.remove(&exec.execution_id);
        result.map(|handler_invoked| ExecutionOutcome {
            execution: exec,
            handler_invoked,
        })
    }

    async fn execute_inner(
        &self,
        job: &JobDefinition,
        exec: &mut JobExecution,
        fence: i64,
    ) -> Result<bool, BelfryError> {
        let now = Utc::now();
        exec.worker_id = Some(self.worker_id.clone());

        // Misfire policy: a fire past its grace is dropped unless the job
        // coalesces missed windows into a catch-up run.
        let lateness = (now - exec.scheduled_time).num_seconds().max(0) as u64;
        if lateness > job.misfire_grace_secs && !job.coalesce {
            exec.state = ExecutionState::Misfired;
            exec.finished_at = Some(now);
            exec.error = Some(format!(
                "missed fire by {lateness}s (grace {}s)",
                job.misfire_grace_secs
            ));
            warn!(job_id = %job.job_id, lateness, "fire misfired, dropped");
            self.persist(exec, fence).await?;
            return Ok(false);
        }

        let Some(handler) = self.registry.lookup(&job.handler) else {
            // Creation-time validation makes this unreachable in practice;
            // a handler deregistered at runtime still fails cleanly.
            exec.state = ExecutionState::Failed;
            exec.finished_at = Some(now);
            exec.error = Some(format!("handler '{}' is not registered", job.handler));
            self.persist(exec, fence).await?;
            return Ok(false);
        };

        exec.state = ExecutionState::Claimed;
        self.persist(exec, fence).await?;

        let cancel = CancellationToken::new();
        self.active
            .insert(exec.execution_id.clone(), cancel.clone());

        let started = Utc::now();
        exec.state = ExecutionState::Running;
        exec.started_at = Some(started);
        self.persist(exec, fence).await?;

        let ctx = HandlerContext {
            job_id: job.job_id.clone(),
            execution_id: exec.execution_id.clone(),
            scheduled_time: exec.scheduled_time,
            attempt_number: exec.attempt_number,
            payload: job.payload.clone(),
            cancel: cancel.clone(),
        };

        let deadline = Duration::from_secs(job.misfire_grace_secs.max(1));
        let mut task = tokio::spawn(async move { handler.run(ctx).await });

        let (state, error) = tokio::select! {
            res = &mut task => match res {
                Ok(Ok(())) => (ExecutionState::Succeeded, None),
                Ok(Err(e)) => (ExecutionState::Failed, Some(e.to_string())),
                Err(join_err) => (
                    ExecutionState::Failed,
                    Some(format!("handler panicked: {join_err}")),
                ),
            },

            _ = cancel.cancelled() => {
                // External cancellation (operator or shutdown): give the
                // handler the kill grace to wind down, then abort hard.
                if tokio::time::timeout(self.kill_grace, &mut task).await.is_err() {
                    task.abort();
                    warn!(execution_id = %exec.execution_id, "handler ignored cancellation, aborted");
                }
                (ExecutionState::Cancelled, Some("cancelled".to_string()))
            }

            _ = tokio::time::sleep(deadline) => {
                // Deadline expiry is a timeout failure, not a cancellation:
                // it drives the retry state machine like any handler error.
                cancel.cancel();
                if tokio::time::timeout(self.kill_grace, &mut task).await.is_err() {
                    task.abort();
                    warn!(execution_id = %exec.execution_id, "handler ignored deadline, aborted");
                }
                let err = BelfryError::Timeout { ms: deadline.as_millis() as u64 };
                (ExecutionState::Failed, Some(err.to_string()))
            }
        };

        exec.state = state;
        exec.error = error;
        exec.finished_at = Some(Utc::now());
        debug!(
            execution_id = %exec.execution_id,
            state = %exec.state,
            "execution finished"
        );
        self.persist(exec, fence).await?;
        Ok(true)
    }

    /// Write an execution row with bounded retries so a transient
    /// persistence failure never drops a terminal outcome. A stale fence is
    /// final and aborts immediately.
    async fn persist(&self, exec: &JobExecution, fence: i64) -> Result<(), BelfryError> {
        let mut last_err = None;
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.store.record_execution(exec, fence) {
                Ok(()) => return Ok(()),
                Err(belfry_store::StoreError::StaleFence { fence, .. }) => {
                    return Err(BelfryError::LeaseLost { fence });
                }
                Err(e) => {
                    warn!(
                        execution_id = %exec.execution_id,
                        attempt,
                        error = %e,
                        "execution write failed, retrying"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
            }
        }
        let e = last_err.expect("at least one attempt ran");
        error!(execution_id = %exec.execution_id, error = %e, "execution write abandoned");
        Err(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerContext, JobHandler};
    use async_trait::async_trait;
    use belfry_core::types::{RetryPolicy, TriggerSpec};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        runs: AtomicU32,
        behaviour: Behaviour,
    }

    enum Behaviour {
        Succeed,
        Fail,
        SleepSecs(u64),
        WaitForCancel,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self, ctx: HandlerContext) -> Result<(), BelfryError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => Err(BelfryError::Handler("boom".to_string())),
                Behaviour::SleepSecs(secs) => {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    Ok(())
                }
                Behaviour::WaitForCancel => {
                    ctx.cancel.cancelled().await;
                    Ok(())
                }
            }
        }
    }

    fn setup(behaviour: Behaviour) -> (Arc<JobExecutor>, Arc<CountingHandler>, Arc<StateStore>) {
        let store = Arc::new(
            StateStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let handler = Arc::new(CountingHandler {
            runs: AtomicU32::new(0),
            behaviour,
        });
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(handler.clone() as Arc<dyn JobHandler>);
        let executor = Arc::new(JobExecutor::new(
            registry,
            store.clone(),
            "test-node".to_string(),
            Duration::from_millis(100),
        ));
        (executor, handler, store)
    }

    fn job(job_id: &str, grace_secs: u64, coalesce: bool) -> JobDefinition {
        let now = Utc::now();
        JobDefinition {
            job_id: job_id.to_string(),
            trigger: TriggerSpec::Interval { every_secs: 60 },
            handler: "counting".to_string(),
            payload: serde_json::json!({}),
            max_instances: 1,
            coalesce,
            misfire_grace_secs: grace_secs,
            retry_policy: RetryPolicy::default(),
            business_hours: None,
            enabled: true,
            dependencies: vec![],
            next_fire: Some(now),
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn successful_run_records_succeeded() {
        let (executor, handler, store) = setup(Behaviour::Succeed);
        let job = job("ok", 60, true);
        store.upsert_job(&job).unwrap();

        assert!(executor.try_claim(&job));
        let exec = JobExecution::new_pending("ok", Utc::now(), 1);
        let outcome = executor.execute(&job, exec, 1).await.unwrap();

        assert_eq!(outcome.execution.state, ExecutionState::Succeeded);
        assert!(outcome.handler_invoked);
        assert!(outcome.execution.started_at.is_some());
        assert!(outcome.execution.finished_at.is_some());
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

        let row = store
            .get_execution(&outcome.execution.execution_id)
            .unwrap()
            .unwrap();
        assert_eq!(row.state, ExecutionState::Succeeded);
        assert_eq!(row.worker_id.as_deref(), Some("test-node"));
    }

    #[tokio::test]
    async fn failing_handler_records_failed_with_error() {
        let (executor, _handler, store) = setup(Behaviour::Fail);
        let job = job("bad", 60, true);
        store.upsert_job(&job).unwrap();

        assert!(executor.try_claim(&job));
        let exec = JobExecution::new_pending("bad", Utc::now(), 1);
        let outcome = executor.execute(&job, exec, 1).await.unwrap();

        assert_eq!(outcome.execution.state, ExecutionState::Failed);
        assert!(outcome.execution.error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout_failure() {
        let (executor, _handler, store) = setup(Behaviour::SleepSecs(30));
        let job = job("slow", 1, true); // 1s deadline
        store.upsert_job(&job).unwrap();

        assert!(executor.try_claim(&job));
        let exec = JobExecution::new_pending("slow", Utc::now(), 1);
        let outcome = executor.execute(&job, exec, 1).await.unwrap();

        assert_eq!(outcome.execution.state, ExecutionState::Failed);
        assert!(outcome
            .execution
            .error
            .as_deref()
            .unwrap()
            .contains("deadline"));
    }

    #[tokio::test]
    async fn external_cancellation_records_cancelled() {
        let (executor, _handler, store) = setup(Behaviour::WaitForCancel);
        let job = job("cancellable", 60, true);
        store.upsert_job(&job).unwrap();

        assert!(executor.try_claim(&job));
        let exec = JobExecution::new_pending("cancellable", Utc::now(), 1);
        let execution_id = exec.execution_id.clone();

        let exec_task = {
            let executor = executor.clone();
            let job = job.clone();
            tokio::spawn(async move { executor.execute(&job, exec, 1).await })
        };

        // Wait until the execution registers its cancellation token.
        for _ in 0..50 {
            if executor.cancel(&execution_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let outcome = exec_task.await.unwrap().unwrap();
        assert_eq!(outcome.execution.state, ExecutionState::Cancelled);
    }

    #[tokio::test]
    async fn late_fire_without_coalesce_misfires() {
        let (executor, handler, store) = setup(Behaviour::Succeed);
        let job = job("late", 60, false);
        store.upsert_job(&job).unwrap();

        assert!(executor.try_claim(&job));
        let scheduled = Utc::now() - chrono::Duration::minutes(10);
        let exec = JobExecution::new_pending("late", scheduled, 1);
        let outcome = executor.execute(&job, exec, 1).await.unwrap();

        assert_eq!(outcome.execution.state, ExecutionState::Misfired);
        assert!(!outcome.handler_invoked);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn late_fire_with_coalesce_catches_up() {
        let (executor, handler, store) = setup(Behaviour::Succeed);
        let job = job("catchup", 60, true);
        store.upsert_job(&job).unwrap();

        assert!(executor.try_claim(&job));
        let scheduled = Utc::now() - chrono::Duration::minutes(10);
        let exec = JobExecution::new_pending("catchup", scheduled, 1);
        let outcome = executor.execute(&job, exec, 1).await.unwrap();

        assert_eq!(outcome.execution.state, ExecutionState::Succeeded);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn try_claim_enforces_max_instances() {
        let (executor, _handler, store) = setup(Behaviour::Succeed);
        let job = job("exclusive", 60, true);
        store.upsert_job(&job).unwrap();

        assert!(executor.try_claim(&job));
        // Ceiling of 1 — second claim fails closed.
        assert!(!executor.try_claim(&job));

        let exec = JobExecution::new_pending("exclusive", Utc::now(), 1);
        executor.execute(&job, exec, 1).await.unwrap();
        // Slot released after the run completes.
        assert!(executor.try_claim(&job));
    }
}
