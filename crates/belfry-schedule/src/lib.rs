//! `belfry-schedule` — pure schedule arithmetic. No I/O, no shared state.
//!
//! # Operations
//!
//! | Function                | Behaviour                                           |
//! |-------------------------|-----------------------------------------------------|
//! | [`next_fire`]           | trigger + reference instant → next fire (or `None`) |
//! | [`apply_business_hours`]| advance a candidate into the configured window      |
//! | [`retry_delay`]         | retry policy + attempt number → back-off duration   |
//! | [`validate_cron`]       | syntax-only check for the job-creation path         |
//!
//! Cron expressions are 5-field (standard), 6-field (with seconds), or a
//! named preset (`@hourly`, `@daily`, …), evaluated in the trigger's IANA
//! timezone. All returned instants are UTC.

pub mod backoff;
pub mod business_hours;
pub mod cron;
pub mod error;
pub mod next_fire;

pub use backoff::retry_delay;
pub use business_hours::apply_business_hours;
pub use cron::{parse_cron, validate_cron};
pub use error::{Result, ScheduleError};
pub use next_fire::{next_fire, validate_trigger};
