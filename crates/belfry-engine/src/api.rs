//! Scheduling API facade — the surface the (external) HTTP/RPC front end
//! calls. All validation lives here so nothing malformed ever reaches the
//! fire-loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use belfry_core::config::SchedulerConfig;
use belfry_core::types::{
    BusinessHours, DlqEntry, JobDefinition, JobExecution, JobPatch, RetryPolicy, TriggerSpec,
};
use belfry_core::{BelfryError, Result};
use belfry_executor::HandlerRegistry;
use belfry_store::StateStore;

use crate::rate_limit::RateLimiter;

/// Caller-supplied job description; unset knobs fall back to configured
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: String,
    pub trigger: TriggerSpec,
    pub handler: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub max_instances: Option<u32>,
    pub coalesce: Option<bool>,
    pub misfire_grace_secs: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    pub business_hours: Option<BusinessHours>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Job CRUD, history, and DLQ replay.
pub struct SchedulerApi {
    store: Arc<StateStore>,
    registry: Arc<HandlerRegistry>,
    defaults: SchedulerConfig,
    limiter: RateLimiter,
}

impl SchedulerApi {
    pub fn new(
        store: Arc<StateStore>,
        registry: Arc<HandlerRegistry>,
        defaults: SchedulerConfig,
    ) -> Self {
        let limiter = RateLimiter::per_minute(defaults.rate_limit_per_minute);
        Self {
            store,
            registry,
            defaults,
            limiter,
        }
    }

    /// Validate and persist a new job; returns the stored definition with
    /// its first fire computed.
    #[instrument(skip(self, spec), fields(job_id = %spec.job_id))]
    pub fn create_job(&self, spec: JobSpec) -> Result<JobDefinition> {
        if !self.limiter.try_acquire() {
            return Err(BelfryError::Throttled {
                per_minute: self.defaults.rate_limit_per_minute,
            });
        }
        if spec.job_id.trim().is_empty() {
            return Err(BelfryError::InvalidTrigger("job_id is empty".to_string()));
        }

        self.validate(&spec.trigger, &spec.handler, spec.business_hours.as_ref())?;

        let now = Utc::now();
        let next_fire = self.first_fire(&spec.trigger, spec.business_hours.as_ref(), now)?;

        let job = JobDefinition {
            job_id: spec.job_id,
            trigger: spec.trigger,
            handler: spec.handler,
            payload: spec.payload,
            max_instances: spec.max_instances.unwrap_or(1).max(1),
            coalesce: spec.coalesce.unwrap_or(true),
            misfire_grace_secs: spec
                .misfire_grace_secs
                .unwrap_or(self.defaults.default_misfire_grace_secs),
            retry_policy: spec
                .retry_policy
                .unwrap_or_else(|| self.defaults.default_retry_policy.clone()),
            business_hours: spec.business_hours,
            enabled: true,
            dependencies: spec.dependencies,
            next_fire: Some(next_fire),
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };

        self.store.insert_job(&job)?;
        info!(job_id = %job.job_id, next_fire = %next_fire, "job created");
        Ok(job)
    }

    /// Apply a partial update. Any change to the trigger or business hours
    /// recomputes the next fire from now.
    #[instrument(skip(self, patch))]
    pub fn update_job(&self, job_id: &str, patch: JobPatch) -> Result<JobDefinition> {
        let mut job = self.get_job(job_id)?;

        let reschedule = patch.trigger.is_some() || patch.business_hours.is_some();

        if let Some(trigger) = patch.trigger {
            job.trigger = trigger;
        }
        if let Some(handler) = patch.handler {
            job.handler = handler;
        }
        if let Some(payload) = patch.payload {
            job.payload = payload;
        }
        if let Some(max_instances) = patch.max_instances {
            job.max_instances = max_instances.max(1);
        }
        if let Some(coalesce) = patch.coalesce {
            job.coalesce = coalesce;
        }
        if let Some(grace) = patch.misfire_grace_secs {
            job.misfire_grace_secs = grace;
        }
        if let Some(retry_policy) = patch.retry_policy {
            job.retry_policy = retry_policy;
        }
        if let Some(business_hours) = patch.business_hours {
            job.business_hours = business_hours;
        }
        if let Some(dependencies) = patch.dependencies {
            job.dependencies = dependencies;
        }

        self.validate(&job.trigger, &job.handler, job.business_hours.as_ref())?;

        let now = Utc::now();
        if reschedule {
            job.next_fire =
                Some(self.first_fire(&job.trigger, job.business_hours.as_ref(), now)?);
        }
        job.updated_at = now.to_rfc3339();

        self.store.upsert_job(&job)?;
        info!(job_id = %job.job_id, "job updated");
        Ok(job)
    }

    /// Remove the definition; execution history stays until the retention
    /// sweep collects it.
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        self.store.delete_job(job_id)?;
        Ok(())
    }

    /// Disable future fires without touching history.
    pub fn pause_job(&self, job_id: &str) -> Result<()> {
        self.store.set_enabled(job_id, false)?;
        info!(job_id, "job paused");
        Ok(())
    }

    /// Re-enable a paused job. The next fire is recomputed from now so a
    /// long pause does not produce a burst of stale fires.
    pub fn resume_job(&self, job_id: &str) -> Result<()> {
        let job = self.get_job(job_id)?;
        let now = Utc::now();
        let next = belfry_schedule::next_fire(&job.trigger, now)
            .map_err(BelfryError::from)?
            .map(|t| self.adjust(t, job.business_hours.as_ref()));
        self.store.set_next_fire(job_id, next)?;
        self.store.set_enabled(job_id, true)?;
        info!(job_id, "job resumed");
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobDefinition> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| BelfryError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        Ok(self.store.list_jobs()?)
    }

    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobExecution>> {
        Ok(self.store.list_history(job_id, limit)?)
    }

    pub fn list_dlq(&self, limit: usize) -> Result<Vec<DlqEntry>> {
        Ok(self.store.list_dlq(limit)?)
    }

    /// Operator action: pull an entry out of the DLQ and make its job due
    /// immediately with a fresh attempt counter.
    #[instrument(skip(self))]
    pub fn replay_dlq_entry(&self, execution_id: &str) -> Result<()> {
        let entry = self
            .store
            .get_dlq(execution_id)?
            .ok_or_else(|| BelfryError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })?;

        // The job must still exist; replaying an orphaned entry is an error
        // the operator should see.
        self.get_job(&entry.job_id)?;

        self.store.set_next_fire(&entry.job_id, Some(Utc::now()))?;
        self.store.remove_dlq(execution_id)?;
        info!(job_id = %entry.job_id, execution_id, "DLQ entry replayed");
        Ok(())
    }

    // --- helpers ------------------------------------------------------------

    fn validate(
        &self,
        trigger: &TriggerSpec,
        handler: &str,
        business_hours: Option<&BusinessHours>,
    ) -> Result<()> {
        belfry_schedule::validate_trigger(trigger).map_err(BelfryError::from)?;
        if let Some(window) = business_hours {
            belfry_schedule::business_hours::validate_business_hours(window)
                .map_err(BelfryError::from)?;
        }
        // Unknown handler types fail fast at creation time, not at fire time.
        if !self.registry.contains(handler) {
            return Err(BelfryError::InvalidTrigger(format!(
                "handler '{handler}' is not registered"
            )));
        }
        Ok(())
    }

    fn first_fire(
        &self,
        trigger: &TriggerSpec,
        business_hours: Option<&BusinessHours>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let next = belfry_schedule::next_fire(trigger, now).map_err(BelfryError::from)?;
        let next = next.ok_or_else(|| {
            BelfryError::InvalidTrigger("trigger has no future fire time".to_string())
        })?;
        Ok(self.adjust(next, business_hours))
    }

    fn adjust(&self, t: DateTime<Utc>, business_hours: Option<&BusinessHours>) -> DateTime<Utc> {
        match business_hours {
            Some(window) => belfry_schedule::apply_business_hours(t, window).unwrap_or(t),
            None => t,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use belfry_executor::{HandlerContext, JobHandler};

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        async fn run(&self, _ctx: HandlerContext) -> std::result::Result<(), BelfryError> {
            Ok(())
        }
    }

    fn api() -> SchedulerApi {
        let store = Arc::new(
            StateStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Arc::new(Noop));
        SchedulerApi::new(store, registry, SchedulerConfig::default())
    }

    fn spec(job_id: &str) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
            trigger: TriggerSpec::Cron {
                expression: "*/5 * * * *".to_string(),
                timezone: "UTC".to_string(),
            },
            handler: "noop".to_string(),
            payload: serde_json::json!({"report": "daily"}),
            max_instances: None,
            coalesce: None,
            misfire_grace_secs: None,
            retry_policy: None,
            business_hours: None,
            dependencies: vec![],
        }
    }

    #[test]
    fn create_computes_first_fire_and_applies_defaults() {
        let api = api();
        let job = api.create_job(spec("reports")).unwrap();

        assert!(job.next_fire.unwrap() > Utc::now());
        assert_eq!(job.max_instances, 1);
        assert!(job.coalesce);
        assert!(job.enabled);
        assert_eq!(job.retry_policy, RetryPolicy::default());
    }

    #[test]
    fn duplicate_create_rejected_original_untouched() {
        let api = api();
        api.create_job(spec("reports")).unwrap();

        let mut dup = spec("reports");
        dup.handler = "noop".to_string();
        dup.payload = serde_json::json!({"report": "weekly"});
        let err = api.create_job(dup).unwrap_err();
        assert!(matches!(err, BelfryError::DuplicateJob { .. }));

        let original = api.get_job("reports").unwrap();
        assert_eq!(original.payload, serde_json::json!({"report": "daily"}));
    }

    #[test]
    fn invalid_cron_rejected_before_persist() {
        let api = api();
        let mut bad = spec("broken");
        bad.trigger = TriggerSpec::Cron {
            expression: "not a cron".to_string(),
            timezone: "UTC".to_string(),
        };
        assert!(matches!(
            api.create_job(bad).unwrap_err(),
            BelfryError::InvalidTrigger(_)
        ));
        assert!(matches!(
            api.get_job("broken").unwrap_err(),
            BelfryError::JobNotFound { .. }
        ));
    }

    #[test]
    fn unknown_handler_rejected_at_creation() {
        let api = api();
        let mut bad = spec("orphan");
        bad.handler = "unregistered".to_string();
        assert!(matches!(
            api.create_job(bad).unwrap_err(),
            BelfryError::InvalidTrigger(_)
        ));
    }

    #[test]
    fn past_one_shot_rejected() {
        let api = api();
        let mut bad = spec("too-late");
        bad.trigger = TriggerSpec::OneShot {
            at: Utc::now() - chrono::Duration::hours(1),
        };
        assert!(matches!(
            api.create_job(bad).unwrap_err(),
            BelfryError::InvalidTrigger(_)
        ));
    }

    #[test]
    fn update_with_new_trigger_recomputes_next_fire() {
        let api = api();
        let created = api.create_job(spec("moving")).unwrap();

        let patch = JobPatch {
            trigger: Some(TriggerSpec::Interval { every_secs: 7200 }),
            ..Default::default()
        };
        let updated = api.update_job("moving", patch).unwrap();

        assert_ne!(updated.next_fire, created.next_fire);
        assert!(updated.next_fire.unwrap() > Utc::now() + chrono::Duration::minutes(100));
    }

    #[test]
    fn pause_resume_toggles_without_losing_history() {
        let api = api();
        api.create_job(spec("toggled")).unwrap();

        api.pause_job("toggled").unwrap();
        assert!(!api.get_job("toggled").unwrap().enabled);

        api.resume_job("toggled").unwrap();
        let resumed = api.get_job("toggled").unwrap();
        assert!(resumed.enabled);
        assert!(resumed.next_fire.unwrap() > Utc::now());
    }

    #[test]
    fn update_missing_job_is_not_found() {
        let api = api();
        assert!(matches!(
            api.update_job("ghost", JobPatch::default()).unwrap_err(),
            BelfryError::JobNotFound { .. }
        ));
    }

    #[test]
    fn throttling_kicks_in_past_the_limit() {
        let store = Arc::new(
            StateStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Arc::new(Noop));
        let config = SchedulerConfig {
            rate_limit_per_minute: 2,
            ..Default::default()
        };
        let api = SchedulerApi::new(store, registry, config);

        api.create_job(spec("a")).unwrap();
        api.create_job(spec("b")).unwrap();
        assert!(matches!(
            api.create_job(spec("c")).unwrap_err(),
            BelfryError::Throttled { .. }
        ));
    }

    #[test]
    fn replay_requires_existing_entry_and_job() {
        let api = api();
        assert!(matches!(
            api.replay_dlq_entry("ghost").unwrap_err(),
            BelfryError::ExecutionNotFound { .. }
        ));
    }
}
