//! `belfry-core` — shared kernel for the Belfry scheduling platform.
//!
//! Holds the types every other crate agrees on: job definitions and their
//! triggers, execution records and their state machine, the leader lease,
//! dead-letter entries, lifecycle events, the error taxonomy, and the
//! TOML + env configuration surface.

pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use config::BelfryConfig;
pub use error::{BelfryError, Result};
pub use event::{JobEvent, JobEventKind};
pub use types::{
    BusinessHours, DlqEntry, ExecutionState, JobDefinition, JobExecution, JobPatch, Lease,
    RetryPolicy, RetryStrategy, TriggerSpec,
};
