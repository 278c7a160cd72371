use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Idempotent — uses `IF NOT EXISTS` throughout, and seeds the singleton
/// lease row so the CAS path never has to handle a missing row.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            job_id              TEXT    NOT NULL PRIMARY KEY,
            trigger_spec        TEXT    NOT NULL,   -- JSON-encoded TriggerSpec
            handler             TEXT    NOT NULL,   -- registered handler name
            payload             TEXT    NOT NULL,   -- opaque JSON
            max_instances       INTEGER NOT NULL DEFAULT 1,
            coalesce_fires      INTEGER NOT NULL DEFAULT 1,
            misfire_grace_secs  INTEGER NOT NULL,
            retry_policy        TEXT    NOT NULL,   -- JSON-encoded RetryPolicy
            business_hours      TEXT,               -- JSON or NULL
            enabled             INTEGER NOT NULL DEFAULT 1,
            dependencies        TEXT    NOT NULL DEFAULT '[]',
            next_fire           TEXT,               -- ISO-8601 or NULL (exhausted)
            claimed_until       TEXT,               -- ISO-8601 claim lease or NULL
            claim_fence         INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        ) STRICT;

        -- Efficient polling: SELECT … WHERE next_fire <= ?  ORDER BY next_fire
        CREATE INDEX IF NOT EXISTS idx_jobs_next_fire ON jobs (next_fire);

        CREATE TABLE IF NOT EXISTS executions (
            execution_id    TEXT    NOT NULL PRIMARY KEY,
            job_id          TEXT    NOT NULL,
            scheduled_time  TEXT    NOT NULL,
            started_at      TEXT,
            finished_at     TEXT,
            state           TEXT    NOT NULL DEFAULT 'pending',
            attempt_number  INTEGER NOT NULL DEFAULT 1,
            error           TEXT,
            worker_id       TEXT,
            fence_token     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_executions_job
            ON executions (job_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_executions_state
            ON executions (job_id, state);

        CREATE TABLE IF NOT EXISTS dlq (
            execution_id        TEXT    NOT NULL PRIMARY KEY,
            job_id              TEXT    NOT NULL,
            reason              TEXT    NOT NULL,
            attempts_exhausted  INTEGER NOT NULL,
            enqueued_at         TEXT    NOT NULL,
            payload_snapshot    TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_dlq_job ON dlq (job_id);

        -- Singleton leader lease; id is pinned to 1 so acquisition is a
        -- conditional UPDATE, never an INSERT race.
        CREATE TABLE IF NOT EXISTS lease (
            id          INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            holder_id   TEXT,
            acquired_at TEXT,
            expires_at  TEXT,
            fence_token INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        INSERT OR IGNORE INTO lease (id, holder_id, acquired_at, expires_at, fence_token)
            VALUES (1, NULL, NULL, NULL, 0);

        -- Short-lived (job_id, scheduled_time) fingerprints collapsing
        -- duplicate claims across leader hand-offs.
        CREATE TABLE IF NOT EXISTS dedup_fingerprints (
            fingerprint TEXT NOT NULL PRIMARY KEY,
            expires_at  TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();

        // Lease singleton exists exactly once.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM lease", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
