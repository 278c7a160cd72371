use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument, warn};

use belfry_core::types::{DlqEntry, ExecutionState, JobDefinition, JobExecution};

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Thread-safe durable store for the scheduling core.
///
/// Wraps a single SQLite connection in a `Mutex`; every replica opens its
/// own connection against the same database file, so cross-replica
/// atomicity comes from the conditional UPDATEs, not from this lock.
pub struct StateStore {
    pub(crate) db: Mutex<Connection>,
}

impl StateStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    // --- jobs ---------------------------------------------------------------

    /// Insert a new job. Fails with `DuplicateJob` when the job_id exists.
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub fn insert_job(&self, job: &JobDefinition) -> Result<()> {
        let db = self.db.lock().unwrap();
        let result = db.execute(
            "INSERT INTO jobs
             (job_id, trigger_spec, handler, payload, max_instances, coalesce_fires,
              misfire_grace_secs, retry_policy, business_hours, enabled,
              dependencies, next_fire, claimed_until, claim_fence,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,NULL,0,?13,?14)",
            rusqlite::params![
                job.job_id,
                serde_json::to_string(&job.trigger)?,
                job.handler,
                job.payload.to_string(),
                job.max_instances,
                job.coalesce,
                job.misfire_grace_secs,
                serde_json::to_string(&job.retry_policy)?,
                job.business_hours
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.enabled,
                serde_json::to_string(&job.dependencies)?,
                job.next_fire.map(|t| t.to_rfc3339()),
                job.created_at,
                job.updated_at,
            ],
        );

        match result {
            Ok(_) => {
                debug!("job inserted");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateJob {
                    job_id: job.job_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert-or-replace a job definition. Claim bookkeeping columns are
    /// preserved on update so an in-flight claim survives a metadata edit.
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub fn upsert_job(&self, job: &JobDefinition) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO jobs
             (job_id, trigger_spec, handler, payload, max_instances, coalesce_fires,
              misfire_grace_secs, retry_policy, business_hours, enabled,
              dependencies, next_fire, claimed_until, claim_fence,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,NULL,0,?13,?14)
             ON CONFLICT(job_id) DO UPDATE SET
               trigger_spec = excluded.trigger_spec,
               handler = excluded.handler,
               payload = excluded.payload,
               max_instances = excluded.max_instances,
               coalesce_fires = excluded.coalesce_fires,
               misfire_grace_secs = excluded.misfire_grace_secs,
               retry_policy = excluded.retry_policy,
               business_hours = excluded.business_hours,
               enabled = excluded.enabled,
               dependencies = excluded.dependencies,
               next_fire = excluded.next_fire,
               updated_at = excluded.updated_at",
            rusqlite::params![
                job.job_id,
                serde_json::to_string(&job.trigger)?,
                job.handler,
                job.payload.to_string(),
                job.max_instances,
                job.coalesce,
                job.misfire_grace_secs,
                serde_json::to_string(&job.retry_policy)?,
                job.business_hours
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                job.enabled,
                serde_json::to_string(&job.dependencies)?,
                job.next_fire.map(|t| t.to_rfc3339()),
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobDefinition>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
            [job_id],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a job definition. Execution history is retained and removed
    /// only by the retention sweep.
    #[instrument(skip(self))]
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM jobs WHERE job_id = ?1", [job_id])?;
        if n == 0 {
            return Err(StoreError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }
        debug!("job deleted");
        Ok(())
    }

    /// Toggle `enabled` without touching history (pause/resume).
    #[instrument(skip(self))]
    pub fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET enabled = ?1, updated_at = ?2 WHERE job_id = ?3",
            rusqlite::params![enabled, Utc::now().to_rfc3339(), job_id],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }
        Ok(())
    }

    /// Persist a freshly computed next-fire instant (`None` = exhausted).
    pub fn set_next_fire(&self, job_id: &str, next: Option<DateTime<Utc>>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE jobs SET next_fire = ?1, updated_at = ?2 WHERE job_id = ?3",
            rusqlite::params![
                next.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                job_id
            ],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound {
                job_id: job_id.to_string(),
            });
        }
        Ok(())
    }

    /// Return all known jobs ordered by creation time.
    pub fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at"))?;
        let rows: Vec<_> = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| r.ok())
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // --- due jobs + claim protocol ------------------------------------------

    /// Atomically claim every enabled job whose next fire has elapsed and
    /// whose dependencies are satisfied.
    ///
    /// Each returned job had its `claimed_until` CAS'd from null/expired to
    /// `now + claim_ttl` under `fence`, so two concurrent callers can never
    /// receive the same job within one claim window.
    #[instrument(skip(self), fields(fence))]
    pub fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        fence: i64,
        claim_ttl: Duration,
        limit: usize,
    ) -> Result<Vec<JobDefinition>> {
        let now_str = now.to_rfc3339();
        let until = (now + chrono::Duration::from_std(claim_ttl).unwrap_or_default()).to_rfc3339();
        let db = self.db.lock().unwrap();

        let candidates: Vec<JobDefinition> = {
            let mut stmt = db.prepare_cached(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE enabled = 1
                   AND next_fire IS NOT NULL AND next_fire <= ?1
                   AND (claimed_until IS NULL OR claimed_until <= ?1)
                 ORDER BY next_fire
                 LIMIT ?2"
            ))?;
            let candidates = stmt
                .query_map(rusqlite::params![now_str, limit as i64], row_to_job)?
                .filter_map(|r| r.ok())
                .filter_map(|r| r.ok())
                .collect();
            candidates
        };

        let mut claimed = Vec::new();
        for job in candidates {
            if !dependencies_satisfied(&db, &job)? {
                debug!(job_id = %job.job_id, "due but dependencies unmet, skipped");
                continue;
            }

            let n = db.execute(
                "UPDATE jobs SET claimed_until = ?1, claim_fence = ?2
                 WHERE job_id = ?3
                   AND (claimed_until IS NULL OR claimed_until <= ?4)",
                rusqlite::params![until, fence, job.job_id, now_str],
            )?;
            if n == 1 {
                claimed.push(job);
            } else {
                // Another replica won the race between SELECT and UPDATE.
                debug!(job_id = %job.job_id, "claim lost to concurrent caller");
            }
        }
        Ok(claimed)
    }

    /// Release a claim after the run finished (or was handed back). No-op if
    /// a newer fence already re-claimed the job.
    pub fn release_claim(&self, job_id: &str, fence: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE jobs SET claimed_until = NULL
             WHERE job_id = ?1 AND claim_fence = ?2",
            rusqlite::params![job_id, fence],
        )?;
        Ok(())
    }

    // --- executions ---------------------------------------------------------

    /// Insert or update one execution attempt.
    ///
    /// Rejects writes whose fence is older than the job row's current
    /// `claim_fence` (a newer leader owns this job now) and refuses to
    /// mutate rows that already reached a terminal state.
    #[instrument(skip(self, exec), fields(execution_id = %exec.execution_id, state = %exec.state))]
    pub fn record_execution(&self, exec: &JobExecution, fence: i64) -> Result<()> {
        let db = self.db.lock().unwrap();

        let row_fence: Option<i64> = db
            .query_row(
                "SELECT claim_fence FROM jobs WHERE job_id = ?1",
                [&exec.job_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                // Job deleted mid-flight; history is still recorded.
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(current) = row_fence {
            if fence < current {
                return Err(StoreError::StaleFence { fence, current });
            }
        }

        let existing: Option<String> = db
            .query_row(
                "SELECT state FROM executions WHERE execution_id = ?1",
                [&exec.execution_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(state) = existing {
            let state: ExecutionState = state
                .parse()
                .map_err(|e: String| StoreError::Corrupt(e))?;
            if state.is_terminal() {
                return Err(StoreError::Corrupt(format!(
                    "execution {} is terminal ({state}) and immutable",
                    exec.execution_id
                )));
            }
        }

        db.execute(
            "INSERT INTO executions
             (execution_id, job_id, scheduled_time, started_at, finished_at,
              state, attempt_number, error, worker_id, fence_token, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(execution_id) DO UPDATE SET
               started_at = excluded.started_at,
               finished_at = excluded.finished_at,
               state = excluded.state,
               error = excluded.error,
               worker_id = excluded.worker_id,
               fence_token = excluded.fence_token",
            rusqlite::params![
                exec.execution_id,
                exec.job_id,
                exec.scheduled_time.to_rfc3339(),
                exec.started_at.map(|t| t.to_rfc3339()),
                exec.finished_at.map(|t| t.to_rfc3339()),
                exec.state.to_string(),
                exec.attempt_number,
                exec.error,
                exec.worker_id,
                fence,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent attempts for a job, newest first.
    pub fn list_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobExecution>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE job_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;
        let rows: Vec<_> = stmt
            .query_map(rusqlite::params![job_id, limit as i64], row_to_execution)?
            .filter_map(|r| r.ok())
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<Option<JobExecution>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE execution_id = ?1"),
            [execution_id],
            row_to_execution,
        ) {
            Ok(exec) => Ok(Some(exec?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of attempts currently claimed or running for a job — the value
    /// checked against `max_instances`.
    pub fn count_active(&self, job_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM executions
             WHERE job_id = ?1 AND state IN ('claimed', 'running')",
            [job_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Fail over executions stranded in `claimed`/`running` by a crashed
    /// process, scoped to jobs whose claim lease has lapsed so a live
    /// leader's in-flight runs are untouched.
    #[instrument(skip(self))]
    pub fn fail_stranded(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_str = now.to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE executions
             SET state = 'failed', error = 'scheduler restarted mid-run', finished_at = ?1
             WHERE state IN ('claimed', 'running')
               AND job_id IN (SELECT job_id FROM jobs
                              WHERE claimed_until IS NULL OR claimed_until <= ?1)",
            [&now_str],
        )?;
        if n > 0 {
            warn!(count = n, "stranded executions failed over on startup");
        }
        Ok(n)
    }

    /// Retention sweep: drop terminal execution rows and DLQ entries older
    /// than the cutoff, plus expired dedup fingerprints.
    #[instrument(skip(self))]
    pub fn cleanup(&self, retention_days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = (now - chrono::Duration::days(retention_days as i64)).to_rfc3339();
        let now_str = now.to_rfc3339();
        let db = self.db.lock().unwrap();

        let executions = db.execute(
            "DELETE FROM executions
             WHERE created_at < ?1
               AND state IN ('succeeded', 'misfired', 'cancelled', 'dead_lettered')",
            [&cutoff],
        )?;
        let dlq = db.execute("DELETE FROM dlq WHERE enqueued_at < ?1", [&cutoff])?;
        let fingerprints = db.execute(
            "DELETE FROM dedup_fingerprints WHERE expires_at <= ?1",
            [&now_str],
        )?;

        let total = executions + dlq + fingerprints;
        if total > 0 {
            debug!(executions, dlq, fingerprints, "retention sweep complete");
        }
        Ok(total)
    }

    // --- dead-letter queue --------------------------------------------------

    pub fn insert_dlq(&self, entry: &DlqEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO dlq
             (execution_id, job_id, reason, attempts_exhausted, enqueued_at, payload_snapshot)
             VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![
                entry.execution_id,
                entry.job_id,
                entry.reason,
                entry.attempts_exhausted,
                entry.enqueued_at.to_rfc3339(),
                entry.payload_snapshot.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn get_dlq(&self, execution_id: &str) -> Result<Option<DlqEntry>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT execution_id, job_id, reason, attempts_exhausted, enqueued_at, payload_snapshot
             FROM dlq WHERE execution_id = ?1",
            [execution_id],
            row_to_dlq,
        ) {
            Ok(entry) => Ok(Some(entry?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_dlq(&self, limit: usize) -> Result<Vec<DlqEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT execution_id, job_id, reason, attempts_exhausted, enqueued_at, payload_snapshot
             FROM dlq ORDER BY enqueued_at DESC LIMIT ?1",
        )?;
        let rows: Vec<_> = stmt
            .query_map([limit as i64], row_to_dlq)?
            .filter_map(|r| r.ok())
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Remove a replayed entry. Errors if it was already consumed.
    pub fn remove_dlq(&self, execution_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM dlq WHERE execution_id = ?1", [execution_id])?;
        if n == 0 {
            return Err(StoreError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            });
        }
        Ok(())
    }

    // --- dedup fingerprints -------------------------------------------------

    /// Record a dispatch fingerprint; returns false when an unexpired
    /// fingerprint already exists (duplicate dispatch, skip it).
    pub fn fingerprint_fresh(
        &self,
        fingerprint: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expires =
            (now + chrono::Duration::from_std(ttl).unwrap_or_default()).to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM dedup_fingerprints WHERE expires_at <= ?1",
            [&now.to_rfc3339()],
        )?;
        let n = db.execute(
            "INSERT OR IGNORE INTO dedup_fingerprints (fingerprint, expires_at) VALUES (?1, ?2)",
            rusqlite::params![fingerprint, expires],
        )?;
        Ok(n == 1)
    }

    /// Drop a fingerprint recorded for a dispatch that was deferred (queue
    /// backpressure), so the re-dispatch on the next cycle is not treated as
    /// a duplicate.
    pub fn forget_fingerprint(&self, fingerprint: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM dedup_fingerprints WHERE fingerprint = ?1",
            [fingerprint],
        )?;
        Ok(())
    }
}

// --- row mapping -------------------------------------------------------------

const JOB_COLUMNS: &str = "job_id, trigger_spec, handler, payload, max_instances, \
     coalesce_fires, misfire_grace_secs, retry_policy, business_hours, enabled, \
     dependencies, next_fire, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "execution_id, job_id, scheduled_time, started_at, \
     finished_at, state, attempt_number, error, worker_id";

/// Check every dependency of `job` for a qualifying successful run: the
/// dependency's most recent terminal execution must be `succeeded`, and must
/// be newer than the dependent's own last success (so each cycle requires a
/// fresh upstream run).
fn dependencies_satisfied(db: &Connection, job: &JobDefinition) -> Result<bool> {
    if job.dependencies.is_empty() {
        return Ok(true);
    }

    let own_last_success: Option<String> = db.query_row(
        "SELECT MAX(finished_at) FROM executions WHERE job_id = ?1 AND state = 'succeeded'",
        [&job.job_id],
        |row| row.get(0),
    )?;

    for dep in &job.dependencies {
        let latest: Option<(String, Option<String>)> = db
            .query_row(
                "SELECT state, finished_at FROM executions
                 WHERE job_id = ?1
                   AND state IN ('succeeded', 'misfired', 'cancelled', 'dead_lettered')
                 ORDER BY finished_at DESC
                 LIMIT 1",
                [dep],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((state, finished_at)) = latest else {
            return Ok(false);
        };
        if state != "succeeded" {
            return Ok(false);
        }
        if let (Some(own), Some(dep_finished)) = (&own_last_success, &finished_at) {
            // RFC-3339 strings compare chronologically.
            if dep_finished <= own {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<JobDefinition>> {
    let trigger_json: String = row.get(1)?;
    let payload_json: String = row.get(3)?;
    let retry_json: String = row.get(7)?;
    let hours_json: Option<String> = row.get(8)?;
    let deps_json: String = row.get(10)?;
    let next_fire: Option<String> = row.get(11)?;

    Ok(build_job(
        row.get(0)?,
        trigger_json,
        row.get(2)?,
        payload_json,
        row.get::<_, i64>(4)? as u32,
        row.get(5)?,
        row.get::<_, i64>(6)? as u64,
        retry_json,
        hours_json,
        row.get(9)?,
        deps_json,
        next_fire,
        row.get(12)?,
        row.get(13)?,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_job(
    job_id: String,
    trigger_json: String,
    handler: String,
    payload_json: String,
    max_instances: u32,
    coalesce: bool,
    misfire_grace_secs: u64,
    retry_json: String,
    hours_json: Option<String>,
    enabled: bool,
    deps_json: String,
    next_fire: Option<String>,
    created_at: String,
    updated_at: String,
) -> Result<JobDefinition> {
    Ok(JobDefinition {
        job_id,
        trigger: serde_json::from_str(&trigger_json)?,
        handler,
        payload: serde_json::from_str(&payload_json)?,
        max_instances,
        coalesce,
        misfire_grace_secs,
        retry_policy: serde_json::from_str(&retry_json)?,
        business_hours: hours_json.as_deref().map(serde_json::from_str).transpose()?,
        enabled,
        dependencies: serde_json::from_str(&deps_json)?,
        next_fire: next_fire.as_deref().map(parse_ts).transpose()?,
        created_at,
        updated_at,
    })
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<JobExecution>> {
    let scheduled: String = row.get(2)?;
    let started: Option<String> = row.get(3)?;
    let finished: Option<String> = row.get(4)?;
    let state: String = row.get(5)?;

    Ok((|| {
        Ok(JobExecution {
            execution_id: row_get_string(row, 0)?,
            job_id: row_get_string(row, 1)?,
            scheduled_time: parse_ts(&scheduled)?,
            started_at: started.as_deref().map(parse_ts).transpose()?,
            finished_at: finished.as_deref().map(parse_ts).transpose()?,
            state: state.parse().map_err(StoreError::Corrupt)?,
            attempt_number: row_get_u32(row, 6)?,
            error: row.get(7).map_err(StoreError::from)?,
            worker_id: row.get(8).map_err(StoreError::from)?,
        })
    })())
}

fn row_to_dlq(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<DlqEntry>> {
    let enqueued: String = row.get(4)?;
    let payload: String = row.get(5)?;

    Ok((|| {
        Ok(DlqEntry {
            execution_id: row_get_string(row, 0)?,
            job_id: row_get_string(row, 1)?,
            reason: row_get_string(row, 2)?,
            attempts_exhausted: row_get_u32(row, 3)?,
            enqueued_at: parse_ts(&enqueued)?,
            payload_snapshot: serde_json::from_str(&payload)?,
        })
    })())
}

fn row_get_string(row: &rusqlite::Row<'_>, idx: usize) -> Result<String> {
    row.get(idx).map_err(StoreError::from)
}

fn row_get_u32(row: &rusqlite::Row<'_>, idx: usize) -> Result<u32> {
    row.get::<_, i64>(idx)
        .map(|v| v as u32)
        .map_err(StoreError::from)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{s}': {e}")))
}
