//! `belfry-engine` — the orchestrating scheduler.
//!
//! # Architecture
//!
//! Every replica runs the same loop: attempt to acquire (or renew) the
//! leader lease, and while holding it, poll the store for due jobs and push
//! them onto a bounded dispatch queue consumed by a fixed-size worker pool.
//! Non-leaders stay idle and re-attempt acquisition every poll interval, so
//! failover is bounded by the lease TTL.
//!
//! The lease fence token travels with every dispatch; the store rejects
//! terminal writes carrying a stale token, which is what makes a deposed
//! leader's in-flight work harmless (at-least-once execution, single
//! recorded outcome).
//!
//! Failures consume the job's retry budget with back-off between attempts;
//! exhaustion parks the job in the dead-letter queue until an operator
//! replays it. Every terminal transition emits one notification.
//!
//! [`SchedulerApi`] is the facade consumed by whatever front end accepts
//! job CRUD — validation happens there, so nothing malformed ever reaches
//! this loop.

pub mod api;
pub mod engine;
pub mod rate_limit;

pub use api::{JobSpec, SchedulerApi};
pub use engine::{DispatchItem, SchedulerEngine};
pub use rate_limit::RateLimiter;
