//! Cron expression handling
//!
//! Workflow documents use standard five-field cron expressions. The `cron`
//! crate wants a seconds column, so five-field input gets `0 ` prepended;
//! six and seven field forms pass through untouched, which also admits
//! per-second schedules in tests.

use std::str::FromStr;

use cron::Schedule;

/// Normalise a document cron expression to the form the scheduler accepts.
pub fn normalize(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

/// Parse a document cron expression, normalising the field count first.
pub fn parse(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&normalize(expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_five_field_gets_seconds_prepended() {
        assert_eq!(normalize("*/5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn test_six_field_passes_through() {
        assert_eq!(normalize("* * * * * *"), "* * * * * *");
    }

    #[test]
    fn test_parse_standard_expression() {
        let schedule = parse("0 9 * * 1-5").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn test_parse_every_second() {
        let schedule = parse("* * * * * *").unwrap();
        let mut upcoming = schedule.upcoming(Utc);
        let first = upcoming.next().unwrap();
        let second = upcoming.next().unwrap();
        assert_eq!((second - first).num_seconds(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("not a cron line").is_err());
        assert!(parse("61 * * * *").is_err());
    }
}
