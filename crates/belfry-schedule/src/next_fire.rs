//! Next-fire computation for every trigger kind.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use belfry_core::types::TriggerSpec;

use crate::cron::parse_cron;
use crate::error::{Result, ScheduleError};

/// Compute the earliest fire instant strictly after `after`.
///
/// Returns `None` when the trigger is exhausted: a `OneShot` whose time has
/// already passed, or a cron expression with no remaining matches.
pub fn next_fire(trigger: &TriggerSpec, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match trigger {
        TriggerSpec::Cron {
            expression,
            timezone,
        } => {
            let schedule = parse_cron(expression)?;
            let tz = parse_timezone(timezone)?;
            let local = after.with_timezone(&tz);
            // The strictly-after filter guards the case where `after` sits
            // exactly on a fire boundary.
            Ok(schedule
                .after(&local)
                .find(|t| *t > local)
                .map(|t| t.with_timezone(&Utc)))
        }

        TriggerSpec::Interval { every_secs } => {
            if *every_secs == 0 {
                return Err(ScheduleError::InvalidSpec(
                    "interval period must be at least 1 second".to_string(),
                ));
            }
            Ok(Some(after + Duration::seconds(*every_secs as i64)))
        }

        TriggerSpec::OneShot { at } => {
            // Fire only if the instant is still in the future.
            if *at > after {
                Ok(Some(*at))
            } else {
                Ok(None)
            }
        }
    }
}

/// Structural validation of a trigger, run once at job creation so malformed
/// definitions never reach the execution pipeline.
pub fn validate_trigger(trigger: &TriggerSpec) -> Result<()> {
    match trigger {
        TriggerSpec::Cron {
            expression,
            timezone,
        } => {
            parse_cron(expression)?;
            parse_timezone(timezone)?;
            Ok(())
        }
        TriggerSpec::Interval { every_secs } => {
            if *every_secs == 0 {
                Err(ScheduleError::InvalidSpec(
                    "interval period must be at least 1 second".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        TriggerSpec::OneShot { .. } => Ok(()),
    }
}

pub(crate) fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}
