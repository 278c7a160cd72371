use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defines when a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Run according to a cron expression (5- or 6-field, or a named preset
    /// like `@hourly`), evaluated in the given IANA timezone.
    Cron { expression: String, timezone: String },

    /// Run repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Run exactly once at the given UTC instant.
    OneShot { at: DateTime<Utc> },
}

/// Back-off strategy applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Every retry waits `initial_delay`.
    Fixed,
    /// Retry N waits `initial_delay * N`.
    Linear,
    /// Retry N waits `initial_delay * 2^(N-1)`, capped at `max_delay`.
    Exponential,
    /// Retry N waits `initial_delay * fib(N)` with `fib(1) = fib(2) = 1`.
    Fibonacci,
}

/// How failed executions are retried before dead-lettering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            initial_delay_secs: 1,
            max_delay_secs: 300,
            max_attempts: 3,
        }
    }
}

/// Optional window restricting valid fire times.
///
/// A candidate fire outside the window (wrong weekday or outside
/// `start..end`) is advanced to the next opening instant in `timezone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    /// Allowed weekdays, 0 = Monday … 6 = Sunday.
    #[serde(default = "default_weekdays")]
    pub days: Vec<u8>,
    /// IANA timezone the window is evaluated in.
    pub timezone: String,
}

fn default_weekdays() -> Vec<u8> {
    vec![0, 1, 2, 3, 4]
}

/// A persisted job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Caller-chosen identifier; primary key.
    pub job_id: String,
    /// When the job fires.
    pub trigger: TriggerSpec,
    /// Name of a registered handler; resolved at claim time.
    pub handler: String,
    /// Arbitrary JSON forwarded to the handler on every run.
    pub payload: serde_json::Value,
    /// Ceiling on concurrent runs of this job_id.
    pub max_instances: u32,
    /// Collapse multiple missed fires into a single catch-up run.
    pub coalesce: bool,
    /// A fire older than this is dropped rather than run late.
    pub misfire_grace_secs: u64,
    pub retry_policy: RetryPolicy,
    pub business_hours: Option<BusinessHours>,
    pub enabled: bool,
    /// Jobs that must have a qualifying successful run before this one is due.
    pub dependencies: Vec<String>,
    /// Next planned fire instant, if any.
    pub next_fire: Option<DateTime<Utc>>,
    /// ISO-8601 timestamp of job creation.
    pub created_at: String,
    /// ISO-8601 timestamp of the last metadata update.
    pub updated_at: String,
}

/// Partial update applied by `update_job`; `None` fields are left unchanged.
///
/// Any patch that touches the trigger or business hours forces a next-fire
/// recomputation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    pub trigger: Option<TriggerSpec>,
    pub handler: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub max_instances: Option<u32>,
    pub coalesce: Option<bool>,
    pub misfire_grace_secs: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    pub business_hours: Option<Option<BusinessHours>>,
    pub dependencies: Option<Vec<String>>,
}

/// Lifecycle state of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed by a worker under the current leader term.
    Claimed,
    /// Handler invocation in progress.
    Running,
    /// Handler returned success — terminal.
    Succeeded,
    /// Handler returned an error; retried while attempts remain.
    Failed,
    /// The grace period elapsed before the fire could run — terminal.
    Misfired,
    /// Handler observed cancellation (or was force-killed) — terminal.
    Cancelled,
    /// Retry budget exhausted; parked in the DLQ — terminal.
    DeadLettered,
}

impl ExecutionState {
    /// Terminal states never transition again; the job itself returns to
    /// pending for its next scheduled fire regardless.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded
                | ExecutionState::Misfired
                | ExecutionState::Cancelled
                | ExecutionState::DeadLettered
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Claimed => "claimed",
            ExecutionState::Running => "running",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Misfired => "misfired",
            ExecutionState::Cancelled => "cancelled",
            ExecutionState::DeadLettered => "dead_lettered",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionState::Pending),
            "claimed" => Ok(ExecutionState::Claimed),
            "running" => Ok(ExecutionState::Running),
            "succeeded" => Ok(ExecutionState::Succeeded),
            "failed" => Ok(ExecutionState::Failed),
            "misfired" => Ok(ExecutionState::Misfired),
            "cancelled" => Ok(ExecutionState::Cancelled),
            "dead_lettered" => Ok(ExecutionState::DeadLettered),
            other => Err(format!("unknown execution state: {other}")),
        }
    }
}

/// One record per execution attempt. Immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    /// UUID v4 string; primary key.
    pub execution_id: String,
    pub job_id: String,
    /// The instant this fire was due.
    pub scheduled_time: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: ExecutionState,
    /// 1-based; compared against `retry_policy.max_attempts`.
    pub attempt_number: u32,
    /// Present when `state` is failed / dead_lettered / misfired.
    pub error: Option<String>,
    /// Replica that ran (or is running) this attempt.
    pub worker_id: Option<String>,
}

impl JobExecution {
    /// Fresh pending attempt for a due fire.
    pub fn new_pending(job_id: &str, scheduled_time: DateTime<Utc>, attempt: u32) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            scheduled_time,
            started_at: None,
            finished_at: None,
            state: ExecutionState::Pending,
            attempt_number: attempt,
            error: None,
            worker_id: None,
        }
    }
}

/// The leader-election record. Exactly one valid (non-expired) lease exists
/// platform-wide; ownership transfers only once the previous lease expired
/// or was explicitly released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Monotonically increasing; attached to every dispatch so stale leaders
    /// are rejected at the store.
    pub fence_token: i64,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A job parked after exhausting its retry budget, pending manual replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub job_id: String,
    pub execution_id: String,
    pub reason: String,
    pub attempts_exhausted: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Copy of the job payload at dead-letter time, so replay survives later
    /// job edits.
    pub payload_snapshot: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn execution_state_round_trip() {
        for state in [
            ExecutionState::Pending,
            ExecutionState::Claimed,
            ExecutionState::Running,
            ExecutionState::Succeeded,
            ExecutionState::Failed,
            ExecutionState::Misfired,
            ExecutionState::Cancelled,
            ExecutionState::DeadLettered,
        ] {
            let parsed = ExecutionState::from_str(&state.to_string()).unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionState::Succeeded.is_terminal());
        assert!(ExecutionState::DeadLettered.is_terminal());
        assert!(ExecutionState::Cancelled.is_terminal());
        assert!(ExecutionState::Misfired.is_terminal());
        assert!(!ExecutionState::Failed.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        assert!(!ExecutionState::Claimed.is_terminal());
        assert!(!ExecutionState::Pending.is_terminal());
    }

    #[test]
    fn trigger_spec_serde_tagging() {
        let trigger = TriggerSpec::Cron {
            expression: "*/5 * * * *".to_string(),
            timezone: "UTC".to_string(),
        };
        let json = serde_json::to_string(&trigger).unwrap();
        assert!(json.contains(r#""kind":"cron""#));

        let back: TriggerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trigger);
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let lease = Lease {
            holder_id: "node-a".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(15),
            fence_token: 7,
        };
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + chrono::Duration::seconds(15)));
    }
}
