//! Leader-lease CAS operations.
//!
//! The lease is a singleton row mutated only by conditional UPDATEs, so any
//! number of replicas can race acquisition safely. The fence token bumps on
//! every ownership transfer (never on renewal), giving later leaders strictly
//! larger tokens.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use belfry_core::types::Lease;

use crate::error::Result;
use crate::store::StateStore;

impl StateStore {
    /// Attempt to take ownership of the lease.
    ///
    /// Succeeds only when the lease is unheld or expired; the fence token is
    /// incremented as part of the same statement. Returns the new lease on
    /// success, `None` when another holder's lease is still valid.
    #[instrument(skip(self))]
    pub fn try_acquire_lease(
        &self,
        holder_id: &str,
        ttl_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>> {
        let now_str = now.to_rfc3339();
        let expires = (now + chrono::Duration::seconds(ttl_secs as i64)).to_rfc3339();
        let db = self.db.lock().unwrap();

        let n = db.execute(
            "UPDATE lease
             SET holder_id = ?1, acquired_at = ?2, expires_at = ?3,
                 fence_token = fence_token + 1
             WHERE id = 1
               AND (holder_id IS NULL OR expires_at IS NULL OR expires_at <= ?2)",
            rusqlite::params![holder_id, now_str, expires],
        )?;
        if n == 0 {
            return Ok(None);
        }

        let lease = read_lease(&db)?.expect("lease row exists after acquire");
        info!(holder = %holder_id, fence = lease.fence_token, "lease acquired");
        Ok(Some(lease))
    }

    /// Extend the current holder's lease without changing the fence token.
    ///
    /// Returns false when the lease was lost (expired and taken, or holder
    /// mismatch) — the caller must stop acting as leader immediately.
    pub fn renew_lease(&self, holder_id: &str, ttl_secs: u64, now: DateTime<Utc>) -> Result<bool> {
        let now_str = now.to_rfc3339();
        let expires = (now + chrono::Duration::seconds(ttl_secs as i64)).to_rfc3339();
        let db = self.db.lock().unwrap();

        let n = db.execute(
            "UPDATE lease SET expires_at = ?1
             WHERE id = 1 AND holder_id = ?2 AND expires_at > ?3",
            rusqlite::params![expires, holder_id, now_str],
        )?;
        if n == 0 {
            debug!(holder = %holder_id, "lease renewal failed, holder deposed");
        }
        Ok(n == 1)
    }

    /// Proactively expire the lease on clean shutdown so standbys take over
    /// without waiting out the TTL. Holder identity is kept for audit.
    #[instrument(skip(self))]
    pub fn release_lease(&self, holder_id: &str, now: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE lease SET expires_at = ?1 WHERE id = 1 AND holder_id = ?2",
            rusqlite::params![now.to_rfc3339(), holder_id],
        )?;
        if n == 1 {
            info!(holder = %holder_id, "lease released");
        }
        Ok(())
    }

    /// The lease row as currently stored; `None` before first acquisition.
    pub fn current_lease(&self) -> Result<Option<Lease>> {
        let db = self.db.lock().unwrap();
        read_lease(&db)
    }
}

fn read_lease(db: &rusqlite::Connection) -> Result<Option<Lease>> {
    let row: (Option<String>, Option<String>, Option<String>, i64) = db.query_row(
        "SELECT holder_id, acquired_at, expires_at, fence_token FROM lease WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    let (Some(holder_id), Some(acquired), Some(expires)) = (row.0, row.1, row.2) else {
        return Ok(None);
    };
    Ok(Some(Lease {
        holder_id,
        acquired_at: parse(&acquired)?,
        expires_at: parse(&expires)?,
        fence_token: row.3,
    }))
}

fn parse(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| crate::error::StoreError::Corrupt(format!("bad lease timestamp '{s}': {e}")))
}
