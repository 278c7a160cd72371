use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use belfry_core::config::{SchedulerConfig, DISPATCH_ENQUEUE_TIMEOUT_MS};
use belfry_core::event::{JobEvent, JobEventKind};
use belfry_core::types::{DlqEntry, ExecutionState, JobDefinition, JobExecution, Lease};
use belfry_core::BelfryError;
use belfry_executor::{ExecutionOutcome, JobExecutor};
use belfry_notify::NotificationService;
use belfry_store::StateStore;

/// How often the retention sweep runs on the leader.
const CLEANUP_INTERVAL_SECS: u64 = 3600;

/// One unit of work travelling from the fire-loop to a worker.
pub struct DispatchItem {
    pub job: JobDefinition,
    pub execution: JobExecution,
    /// Fence token of the leader term that issued this dispatch.
    pub fence: i64,
}

/// The orchestrator: leader election, fire-loop, worker pool, retry/DLQ.
pub struct SchedulerEngine {
    store: Arc<StateStore>,
    executor: Arc<JobExecutor>,
    notifier: Arc<NotificationService>,
    config: SchedulerConfig,
    node_id: String,
    /// The lease we believe we hold; cleared the moment a renewal fails.
    leader: Mutex<Option<Lease>>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<StateStore>,
        executor: Arc<JobExecutor>,
        notifier: Arc<NotificationService>,
        config: SchedulerConfig,
        node_id: String,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
            config,
            node_id,
            leader: Mutex::new(None),
        }
    }

    /// True while this replica holds a lease it believes is valid.
    pub fn is_leader(&self) -> bool {
        self.leader.lock().unwrap().is_some()
    }

    /// Main loop. Polls every `poll_interval` until `shutdown` broadcasts
    /// `true`; on exit the lease is released proactively so a standby takes
    /// over without waiting out the TTL.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(node = %self.node_id, "scheduler engine started");

        if let Err(e) = self.store.fail_stranded(Utc::now()) {
            error!(error = %e, "stranded-execution sweep failed");
        }

        let (tx, rx) = mpsc::channel::<DispatchItem>(self.config.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::new();
        for worker_index in 0..self.config.max_workers.max(1) {
            let engine = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let tx = tx.clone();
            let mut shutdown_rx = shutdown.clone();
            workers.push(tokio::spawn(async move {
                // Small start jitter so a fresh pool does not stampede the
                // store on the first tick.
                let jitter = rand::thread_rng().gen_range(0..50u64);
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                loop {
                    let item = loop {
                        let mut rx_guard = rx.lock().await;
                        tokio::select! {
                            item = rx_guard.recv() => break item,
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break None;
                                }
                            }
                        }
                    };
                    let Some(item) = item else { break };
                    engine.process(item, &tx).await;
                }
                debug!(worker_index, "worker stopped");
            }));
        }

        let poll = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(poll);
        let mut last_cleanup = Instant::now();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    // Non-leaders idle here and re-attempt next tick.
                    let Some(fence) = self.ensure_leadership(now) else { continue };

                    self.dispatch_due(now, fence, &tx).await;

                    if last_cleanup.elapsed() >= Duration::from_secs(CLEANUP_INTERVAL_SECS) {
                        last_cleanup = Instant::now();
                        if let Err(e) =
                            self.store.cleanup(self.config.history_retention_days, now)
                        {
                            error!(error = %e, "retention sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }

        let was_leader = self.leader.lock().unwrap().take().is_some();
        if was_leader {
            if let Err(e) = self.store.release_lease(&self.node_id, Utc::now()) {
                error!(error = %e, "lease release on shutdown failed");
            }
        }

        drop(tx);
        for handle in workers {
            let _ = handle.await;
        }
        info!("scheduler engine stopped");
    }

    // --- leadership ---------------------------------------------------------

    /// Renew the held lease or race for a free one. Returns the fence token
    /// while this replica is the leader, `None` otherwise.
    ///
    /// A failed renewal clears leader state immediately; leadership errors
    /// are never retried within the same term.
    fn ensure_leadership(&self, now: DateTime<Utc>) -> Option<i64> {
        let mut guard = self.leader.lock().unwrap();

        if let Some(lease) = guard.as_ref() {
            match self
                .store
                .renew_lease(&self.node_id, self.config.lease_ttl_secs, now)
            {
                Ok(true) => return Some(lease.fence_token),
                Ok(false) => {
                    warn!(node = %self.node_id, "leadership lost: lease not renewable");
                    *guard = None;
                }
                Err(e) => {
                    error!(error = %e, "lease renewal errored, relinquishing leadership");
                    *guard = None;
                }
            }
        }

        match self
            .store
            .try_acquire_lease(&self.node_id, self.config.lease_ttl_secs, now)
        {
            Ok(Some(lease)) => {
                info!(node = %self.node_id, fence = lease.fence_token, "became leader");
                let fence = lease.fence_token;
                *guard = Some(lease);
                Some(fence)
            }
            Ok(None) => None,
            Err(e) => {
                error!(error = %e, "lease acquisition failed");
                None
            }
        }
    }

    // --- dispatch -----------------------------------------------------------

    async fn dispatch_due(&self, now: DateTime<Utc>, fence: i64, tx: &mpsc::Sender<DispatchItem>) {
        let claim_ttl = Duration::from_secs(self.config.lease_ttl_secs);
        let due = match self
            .store
            .claim_due_jobs(now, fence, claim_ttl, self.config.queue_depth)
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-job poll failed");
                return;
            }
        };

        for job in due {
            let Some(scheduled) = job.next_fire else { continue };

            // Collapse duplicate claims caused by leader hand-off races.
            let fingerprint = format!("{}@{}", job.job_id, scheduled.to_rfc3339());
            match self.store.fingerprint_fresh(
                &fingerprint,
                Duration::from_secs(self.config.dedup_window_secs),
                now,
            ) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.job_id, "duplicate dispatch collapsed by dedup window");
                    let _ = self.store.release_claim(&job.job_id, fence);
                    continue;
                }
                Err(e) => {
                    error!(job_id = %job.job_id, error = %e, "dedup check failed, fire deferred");
                    let _ = self.store.release_claim(&job.job_id, fence);
                    continue;
                }
            }

            let execution = JobExecution::new_pending(&job.job_id, scheduled, 1);
            let item = DispatchItem {
                job: job.clone(),
                execution,
                fence,
            };

            match tx
                .send_timeout(item, Duration::from_millis(DISPATCH_ENQUEUE_TIMEOUT_MS))
                .await
            {
                Ok(()) => {
                    // Advance the schedule. Coalescing jobs step past every
                    // missed window at once; non-coalescing jobs walk window
                    // by window so each missed fire gets its own (possibly
                    // misfired) attempt.
                    let reference = if job.coalesce { now } else { scheduled };
                    let next = self.compute_next(&job, reference);
                    if let Err(e) = self.store.set_next_fire(&job.job_id, next) {
                        warn!(job_id = %job.job_id, error = %e, "next-fire update failed");
                    }
                }
                Err(_) => {
                    // Backpressure valve: the queue stayed full past the
                    // enqueue timeout, so this fire waits for the next cycle.
                    warn!(job_id = %job.job_id, "dispatch queue full, fire deferred");
                    let _ = self.store.forget_fingerprint(&fingerprint);
                    let _ = self.store.release_claim(&job.job_id, fence);
                }
            }
        }
    }

    fn compute_next(&self, job: &JobDefinition, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = match belfry_schedule::next_fire(&job.trigger, reference) {
            Ok(next) => next,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "next-fire computation failed");
                None
            }
        };
        match (next, job.business_hours.as_ref()) {
            (Some(t), Some(window)) => match belfry_schedule::apply_business_hours(t, window) {
                Ok(adjusted) => Some(adjusted),
                Err(e) => {
                    error!(job_id = %job.job_id, error = %e, "business-hours adjustment failed");
                    Some(t)
                }
            },
            (next, _) => next,
        }
    }

    // --- worker path --------------------------------------------------------

    async fn process(&self, item: DispatchItem, tx: &mpsc::Sender<DispatchItem>) {
        let DispatchItem {
            job,
            execution,
            fence,
        } = item;

        if !self.executor.try_claim(&job) {
            warn!(job_id = %job.job_id, "max_instances reached, fire skipped");
            let _ = self.store.release_claim(&job.job_id, fence);
            return;
        }

        self.notifier
            .notify(JobEvent::from_execution(JobEventKind::Started, &execution));

        match self.executor.execute(&job, execution, fence).await {
            Ok(outcome) => self.settle(&job, outcome, fence, tx).await,
            Err(BelfryError::LeaseLost { fence }) => {
                // Expected when a new leader claimed the same fire during
                // hand-off; the handler may have run, the outcome is void.
                debug!(job_id = %job.job_id, fence, "dispatch rejected, leader deposed");
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "execution outcome could not be recorded");
                let _ = self.store.release_claim(&job.job_id, fence);
            }
        }
    }

    async fn settle(
        &self,
        job: &JobDefinition,
        outcome: ExecutionOutcome,
        fence: i64,
        tx: &mpsc::Sender<DispatchItem>,
    ) {
        let exec = outcome.execution;
        match exec.state {
            ExecutionState::Succeeded => {
                self.notifier
                    .notify(JobEvent::from_execution(JobEventKind::Succeeded, &exec));
            }

            // No dedicated event kinds for these; the `state` field on the
            // payload carries the distinction for listeners.
            ExecutionState::Misfired | ExecutionState::Cancelled => {
                self.notifier
                    .notify(JobEvent::from_execution(JobEventKind::Failed, &exec));
            }

            ExecutionState::Failed => {
                let max_attempts = job.retry_policy.max_attempts.max(1);
                if !outcome.handler_invoked || exec.attempt_number >= max_attempts {
                    self.dead_letter(job, exec, fence).await;
                } else {
                    self.notifier
                        .notify(JobEvent::from_execution(JobEventKind::Failed, &exec));
                    self.schedule_retry(job, &exec, fence, tx);
                }
            }

            other => warn!(state = %other, "execution settled in unexpected state"),
        }
        let _ = self.store.release_claim(&job.job_id, fence);
    }

    /// Queue the next attempt after the policy's back-off delay. The job
    /// definition is re-read at fire time so edits, pauses, and deletions
    /// between attempts are honored.
    fn schedule_retry(
        &self,
        job: &JobDefinition,
        exec: &JobExecution,
        fence: i64,
        tx: &mpsc::Sender<DispatchItem>,
    ) {
        let delay = belfry_schedule::retry_delay(&job.retry_policy, exec.attempt_number);
        let retry = JobExecution::new_pending(&job.job_id, exec.scheduled_time, exec.attempt_number + 1);
        info!(
            job_id = %job.job_id,
            attempt = retry.attempt_number,
            delay_secs = delay.as_secs(),
            "retry scheduled"
        );

        let store = Arc::clone(&self.store);
        let tx = tx.clone();
        let job_id = job.job_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let job = match store.get_job(&job_id) {
                Ok(Some(job)) if job.enabled => job,
                Ok(_) => {
                    debug!(job_id = %job_id, "job removed or paused, retry dropped");
                    return;
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "retry lookup failed");
                    return;
                }
            };
            if tx
                .send(DispatchItem {
                    job,
                    execution: retry,
                    fence,
                })
                .await
                .is_err()
            {
                debug!(job_id = %job_id, "engine stopped, retry dropped");
            }
        });
    }

    /// Park an exhausted job in the DLQ and flip its final attempt to
    /// `dead_lettered`.
    async fn dead_letter(&self, job: &JobDefinition, mut exec: JobExecution, fence: i64) {
        let reason = exec
            .error
            .clone()
            .unwrap_or_else(|| "handler failed".to_string());
        exec.state = ExecutionState::DeadLettered;
        if exec.finished_at.is_none() {
            exec.finished_at = Some(Utc::now());
        }
        if let Err(e) = self.store.record_execution(&exec, fence) {
            error!(
                execution_id = %exec.execution_id,
                error = %e,
                "dead-letter state write failed"
            );
        }

        let entry = DlqEntry {
            job_id: job.job_id.clone(),
            execution_id: exec.execution_id.clone(),
            reason,
            attempts_exhausted: exec.attempt_number,
            enqueued_at: Utc::now(),
            payload_snapshot: job.payload.clone(),
        };
        if let Err(e) = self.store.insert_dlq(&entry) {
            error!(job_id = %job.job_id, error = %e, "DLQ write failed");
        }
        warn!(
            job_id = %job.job_id,
            attempts = exec.attempt_number,
            "retry budget exhausted, dead-lettered"
        );
        self.notifier
            .notify(JobEvent::from_execution(JobEventKind::DeadLettered, &exec));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use belfry_core::types::{BusinessHours, RetryPolicy, TriggerSpec};
    use belfry_executor::HandlerRegistry;

    fn engine() -> Arc<SchedulerEngine> {
        let store = Arc::new(
            StateStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let registry = Arc::new(HandlerRegistry::new());
        let executor = Arc::new(JobExecutor::new(
            registry,
            store.clone(),
            "node-test".to_string(),
            Duration::from_millis(100),
        ));
        Arc::new(SchedulerEngine::new(
            store,
            executor,
            Arc::new(NotificationService::new()),
            SchedulerConfig::default(),
            "node-test".to_string(),
        ))
    }

    #[test]
    fn leadership_is_acquired_then_renewed() {
        let engine = engine();
        let now = Utc::now();

        let fence = engine.ensure_leadership(now).unwrap();
        assert!(engine.is_leader());

        // Subsequent ticks renew without changing the fence.
        let again = engine.ensure_leadership(now + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(fence, again);
    }

    #[test]
    fn standby_defers_to_live_leader() {
        let engine = engine();
        let now = Utc::now();
        engine
            .store
            .try_acquire_lease("other-node", 60, now)
            .unwrap()
            .unwrap();

        assert!(engine.ensure_leadership(now).is_none());
        assert!(!engine.is_leader());
    }

    #[test]
    fn compute_next_applies_business_hours() {
        let engine = engine();
        let job = JobDefinition {
            job_id: "windowed".to_string(),
            trigger: TriggerSpec::Interval { every_secs: 3600 },
            handler: "noop".to_string(),
            payload: serde_json::json!({}),
            max_instances: 1,
            coalesce: true,
            misfire_grace_secs: 60,
            retry_policy: RetryPolicy::default(),
            business_hours: Some(BusinessHours {
                start_hour: 9,
                start_minute: 0,
                end_hour: 17,
                end_minute: 0,
                days: vec![0, 1, 2, 3, 4],
                timezone: "UTC".to_string(),
            }),
            enabled: true,
            dependencies: vec![],
            next_fire: None,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        };

        // Saturday 2024-03-09 22:00 + 1h lands Saturday 23:00, outside the
        // window, so it advances to Monday 09:00.
        let reference = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 9, 22, 0, 0).unwrap();
        let next = engine.compute_next(&job, reference).unwrap();
        let expected = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 11, 9, 0, 0).unwrap();
        assert_eq!(next, expected);
    }
}
