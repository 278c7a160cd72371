//! Job lifecycle events, shared between the engine and all notifier backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ExecutionState;

/// What happened to an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Started,
    Succeeded,
    Failed,
    DeadLettered,
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobEventKind::Started => "started",
            JobEventKind::Succeeded => "succeeded",
            JobEventKind::Failed => "failed",
            JobEventKind::DeadLettered => "dead_lettered",
        };
        write!(f, "{s}")
    }
}

/// Outbound notification payload: one per terminal transition (plus a
/// best-effort `Started`). Delivery failures never affect job state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job_id: String,
    pub execution_id: String,
    pub state: ExecutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempt_number: u32,
}

impl JobEvent {
    /// Build an event from an execution record.
    pub fn from_execution(kind: JobEventKind, exec: &crate::types::JobExecution) -> Self {
        Self {
            kind,
            job_id: exec.job_id.clone(),
            execution_id: exec.execution_id.clone(),
            state: exec.state,
            error: exec.error.clone(),
            scheduled_time: exec.scheduled_time,
            started_at: exec.started_at,
            finished_at: exec.finished_at,
            attempt_number: exec.attempt_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobExecution;

    #[test]
    fn event_serializes_without_absent_fields() {
        let exec = JobExecution::new_pending("nightly-report", Utc::now(), 1);
        let event = JobEvent::from_execution(JobEventKind::Started, &exec);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""kind":"started""#));
        assert!(json.contains("nightly-report"));
        // error / started_at / finished_at are None and must be absent
        assert!(!json.contains(r#""error""#));
        assert!(!json.contains(r#""finished_at""#));
    }
}
