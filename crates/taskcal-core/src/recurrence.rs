//! Structural checks for event recurrence rules.
//!
//! Rules use the iCalendar `RRULE:` syntax but are only checked for shape: the
//! prefix must be present and every `KEY=VALUE` component must use a known key.
//! Rules are stored verbatim and never expanded into occurrences.

use crate::error::{Error, Result};

/// Required prefix of every rule.
pub const RRULE_PREFIX: &str = "RRULE:";

/// Component keys a rule may contain.
pub const ALLOWED_KEYS: [&str; 7] = [
    "FREQ",
    "INTERVAL",
    "COUNT",
    "UNTIL",
    "BYDAY",
    "BYMONTH",
    "BYMONTHDAY",
];

/// Validate a rule and return its `(key, value)` components in order.
pub fn parse_rule(rule: &str) -> Result<Vec<(&str, &str)>> {
    let body = rule.strip_prefix(RRULE_PREFIX).ok_or_else(|| {
        Error::invalid_field(
            "recurrence_rule",
            format!("Recurrence rule must start with '{}'", RRULE_PREFIX),
        )
    })?;

    let mut components = Vec::new();
    for part in body.split(';') {
        if part.is_empty() {
            // Tolerate a trailing ';'
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| {
            Error::invalid_field(
                "recurrence_rule",
                format!("Malformed recurrence component: '{}'", part),
            )
        })?;
        if !ALLOWED_KEYS.contains(&key) {
            return Err(Error::invalid_field(
                "recurrence_rule",
                format!("Unsupported recurrence component: '{}'", key),
            ));
        }
        if value.is_empty() {
            return Err(Error::invalid_field(
                "recurrence_rule",
                format!("Recurrence component '{}' has no value", key),
            ));
        }
        components.push((key, value));
    }

    if components.is_empty() {
        return Err(Error::invalid_field(
            "recurrence_rule",
            "Recurrence rule has no components",
        ));
    }

    Ok(components)
}

/// Validate a rule's structure.
pub fn validate_rule(rule: &str) -> Result<()> {
    parse_rule(rule).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_weekly_rule() {
        let parts = parse_rule("RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE").unwrap();
        assert_eq!(
            parts,
            vec![("FREQ", "WEEKLY"), ("INTERVAL", "2"), ("BYDAY", "MO,WE")]
        );
    }

    #[test]
    fn test_all_allowed_keys_accepted() {
        let rule = "RRULE:FREQ=MONTHLY;INTERVAL=1;COUNT=5;UNTIL=20261231T000000Z;BYDAY=MO;BYMONTH=1;BYMONTHDAY=15";
        assert!(validate_rule(rule).is_ok());
    }

    #[test]
    fn test_missing_prefix_rejected() {
        let err = validate_rule("FREQ=DAILY").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("RRULE:"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = validate_rule("RRULE:FREQ=DAILY;BYSETPOS=1").unwrap_err();
        assert!(err.to_string().contains("BYSETPOS"));
    }

    #[test]
    fn test_lowercase_key_rejected() {
        assert!(validate_rule("RRULE:freq=DAILY").is_err());
    }

    #[test]
    fn test_empty_and_malformed_rejected() {
        assert!(validate_rule("RRULE:").is_err());
        assert!(validate_rule("RRULE:;").is_err());
        assert!(validate_rule("RRULE:FREQ").is_err());
        assert!(validate_rule("RRULE:FREQ=").is_err());
    }

    #[test]
    fn test_trailing_separator_tolerated() {
        assert!(validate_rule("RRULE:FREQ=DAILY;").is_ok());
    }
}
