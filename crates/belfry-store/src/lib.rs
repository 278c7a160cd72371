//! `belfry-store` — durable state for jobs, executions, the leader lease,
//! the dead-letter queue, and dispatch dedup fingerprints.
//!
//! Everything lives in one SQLite database (STRICT tables, WAL journal).
//! The only operations needing cross-caller atomicity are the due-job claim
//! and the lease CAS. Both are conditional single-row UPDATEs, so no
//! cross-row transaction is ever required.
//!
//! # Claim protocol
//!
//! `claim_due_jobs` marks each returned job with `claimed_until` (a lease on
//! the fire) and `claim_fence` (the claiming leader's fence token). A job
//! already claimed and unexpired is skipped; a terminal write carrying a
//! fence older than the row's `claim_fence` is rejected with `StaleFence`,
//! which is how a deposed leader's late dispatches are fenced off.

pub mod db;
pub mod error;
pub mod lease;
pub mod store;

pub use error::{Result, StoreError};
pub use store::StateStore;
