//! `belfry-executor` — runs one claimed job attempt to a terminal state.
//!
//! The executor resolves the job's handler from the registry, enforces the
//! per-job concurrency ceiling (`try_claim` fails closed at `max_instances`),
//! applies the misfire policy, and drives the handler under a hard deadline
//! with cooperative-then-forced cancellation. Every state transition is
//! persisted through the store with bounded write retries — a terminal
//! outcome is never silently dropped.

pub mod executor;
pub mod handler;
pub mod registry;

pub use executor::{ExecutionOutcome, JobExecutor};
pub use handler::{HandlerContext, JobHandler};
pub use registry::HandlerRegistry;
