//! Cron expression normalisation and parsing.
//!
//! The `cron` crate wants a seconds field, so standard 5-field expressions
//! are widened with a leading `0`. Named presets are mapped to their
//! canonical 6-field forms before parsing.

use std::str::FromStr;

use cron::Schedule;

use crate::error::{Result, ScheduleError};

const MAX_EXPRESSION_LEN: usize = 256;

/// Parse a cron expression into a [`cron::Schedule`].
///
/// Accepted forms:
/// - 5 fields (`*/5 * * * *`): seconds are pinned to `0`
/// - 6 fields (`30 */5 * * * *`): seconds included
/// - named presets: `@yearly`/`@annually`, `@monthly`, `@weekly`,
///   `@daily`/`@midnight`, `@hourly`, `@minutely`
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalized = normalize(expression)?;
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Syntax-only check, used by the job-creation API path before a job
/// definition is persisted.
pub fn validate_cron(expression: &str) -> Result<()> {
    parse_cron(expression).map(|_| ())
}

fn normalize(expression: &str) -> Result<String> {
    let expr = expression.trim();

    if expr.is_empty() {
        return Err(ScheduleError::InvalidExpression {
            expression: expression.to_string(),
            reason: "expression is empty".to_string(),
        });
    }
    if expr.len() > MAX_EXPRESSION_LEN {
        return Err(ScheduleError::InvalidExpression {
            expression: format!("{}…", &expr[..32]),
            reason: format!("expression exceeds {MAX_EXPRESSION_LEN} characters"),
        });
    }

    if let Some(preset) = expr.strip_prefix('@') {
        return preset_to_fields(preset).map(String::from).ok_or_else(|| {
            ScheduleError::InvalidExpression {
                expression: expression.to_string(),
                reason: format!("unknown preset @{preset}"),
            }
        });
    }

    match expr.split_whitespace().count() {
        // Standard crontab form; widen with a seconds field.
        5 => Ok(format!("0 {expr}")),
        6 | 7 => Ok(expr.to_string()),
        n => Err(ScheduleError::InvalidExpression {
            expression: expression.to_string(),
            reason: format!("expected 5 or 6 fields, got {n}"),
        }),
    }
}

fn preset_to_fields(preset: &str) -> Option<&'static str> {
    match preset {
        "yearly" | "annually" => Some("0 0 0 1 1 *"),
        "monthly" => Some("0 0 0 1 * *"),
        "weekly" => Some("0 0 0 * * Sun"),
        "daily" | "midnight" => Some("0 0 0 * * *"),
        "hourly" => Some("0 0 * * * *"),
        "minutely" => Some("0 * * * * *"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expression_parses() {
        assert!(validate_cron("*/5 * * * *").is_ok());
        assert!(validate_cron("0 9 * * Mon-Fri").is_ok());
        assert!(validate_cron("15 2 1 * *").is_ok());
    }

    #[test]
    fn six_field_expression_parses() {
        assert!(validate_cron("30 */5 * * * *").is_ok());
        assert!(validate_cron("0 0 0 * * Sun").is_ok());
    }

    #[test]
    fn named_presets_parse() {
        for preset in [
            "@yearly",
            "@annually",
            "@monthly",
            "@weekly",
            "@daily",
            "@midnight",
            "@hourly",
            "@minutely",
        ] {
            assert!(validate_cron(preset).is_ok(), "{preset} should parse");
        }
    }

    #[test]
    fn malformed_expressions_rejected() {
        assert!(validate_cron("").is_err());
        assert!(validate_cron("not a cron").is_err());
        assert!(validate_cron("* * *").is_err());
        assert!(validate_cron("99 * * * *").is_err());
        assert!(validate_cron("@fortnightly").is_err());
    }

    #[test]
    fn five_field_gets_zero_seconds() {
        // "* * * * *" must fire at second 0 of every minute, not every second.
        let schedule = parse_cron("* * * * *").unwrap();
        let next = schedule
            .after(&chrono::Utc::now())
            .next()
            .expect("wildcard expression always has a next fire");
        assert_eq!(chrono::Timelike::second(&next), 0);
    }
}
