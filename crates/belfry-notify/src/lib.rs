//! `belfry-notify` — outbound job lifecycle notifications.
//!
//! One [`Notifier`] call per lifecycle event (`started`, `succeeded`,
//! `failed`, `dead_lettered`). Transports are interchangeable behind the
//! trait; the [`NotificationService`] fans an event out to every configured
//! transport on a detached task, so delivery failures are logged and
//! swallowed — they never affect job state or roll back a scheduling
//! decision.

pub mod error;
pub mod log;
pub mod notifier;
pub mod webhook;

pub use error::NotifyError;
pub use log::LogNotifier;
pub use notifier::{NotificationService, Notifier};
pub use webhook::WebhookNotifier;
