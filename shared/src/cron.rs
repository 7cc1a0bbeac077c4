//! Cron expression validation, canonicalization, and the preset list
//! surfaced by the control plane (§4.1, §8.1.7, §14).

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A validated cron expression plus its canonical rendering.
#[derive(Debug, Clone)]
pub struct ValidatedCron {
    pub canonical: String,
    schedule: Schedule,
}

impl ValidatedCron {
    /// The next fire time strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Parse and validate a cron expression. Accepts classic five-field
/// crontab syntax (minute hour dom month weekday) in addition to the six
/// field form the `cron` crate expects natively; five-field input is
/// adapted before parsing. Returns the canonical form; re-validating the
/// canonical form yields the same canonical form again (idempotent), since
/// `Schedule`'s `Display` is a pure function of its parsed fields.
pub fn validate(expression: &str) -> crate::Result<ValidatedCron> {
    let trimmed = expression.trim();
    let adapted = adapt_to_cron_crate_syntax(trimmed);
    let schedule = Schedule::from_str(&adapted).map_err(|e| {
        crate::Error::Validation(format!("invalid cron expression '{}': {}", trimmed, e))
    })?;
    let canonical = schedule.to_string();
    Ok(ValidatedCron { canonical, schedule })
}

/// Adapts a classic five-field crontab expression (minute hour dom month
/// weekday) to what the `cron` crate's parser expects: six fields with a
/// leading seconds field, and Quartz-style weekday numbering (1 = Sunday
/// ... 7 = Saturday). Expressions that already have six or more fields are
/// passed through unchanged.
fn adapt_to_cron_crate_syntax(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return expression.to_string();
    }

    let (minute, hour, dom, month, weekday) = (fields[0], fields[1], fields[2], fields[3], fields[4]);
    format!("0 {} {} {} {} {}", minute, hour, dom, month, adapt_weekday_field(weekday))
}

/// Remaps a classic weekday field, which may list multiple comma-separated
/// atoms, ranges, and step values.
fn adapt_weekday_field(field: &str) -> String {
    field.split(',').map(adapt_weekday_part).collect::<Vec<_>>().join(",")
}

fn adapt_weekday_part(part: &str) -> String {
    let mut result = String::new();
    let mut current = String::new();
    for c in part.chars() {
        if c == '-' || c == '/' {
            result.push_str(&remap_weekday_atom(&current));
            result.push(c);
            current.clear();
        } else {
            current.push(c);
        }
    }
    result.push_str(&remap_weekday_atom(&current));
    result
}

/// Remaps a single classic-cron weekday digit to the `cron` crate's
/// Quartz-style numbering. Classic crontab accepts both 0-6 (Sunday = 0)
/// and the 0-7 extension (Sunday = 0 or 7); the `cron` crate wants 1-7
/// with Sunday = 1. Non-numeric atoms (`*`, day names) pass through
/// untouched.
fn remap_weekday_atom(atom: &str) -> String {
    match atom.parse::<u32>() {
        Ok(0) | Ok(7) => "1".to_string(),
        Ok(n) if n <= 6 => (n + 1).to_string(),
        _ => atom.to_string(),
    }
}

/// A named cron preset offered by the control plane's schedule picker.
#[derive(Debug, Clone, Copy)]
pub struct CronPreset {
    pub label: &'static str,
    pub expression: &'static str,
}

/// Common schedules, six-field (sec min hour dom month dow) as the `cron`
/// crate expects.
pub const PRESETS: &[CronPreset] = &[
    CronPreset {
        label: "Every 15 minutes",
        expression: "0 */15 * * * *",
    },
    CronPreset {
        label: "Every hour",
        expression: "0 0 * * * *",
    },
    CronPreset {
        label: "Every 6 hours",
        expression: "0 0 */6 * * *",
    },
    CronPreset {
        label: "Daily at midnight",
        expression: "0 0 0 * * *",
    },
    CronPreset {
        label: "Daily at 3 AM",
        expression: "0 0 3 * * *",
    },
    CronPreset {
        label: "Weekly on Sunday at midnight",
        expression: "0 0 0 * * Sun",
    },
];

/// Pick a random preset expression. Used by the control plane's "surprise
/// me" schedule generator (§14); callers must not rely on this for
/// anything load-bearing since the choice is not reproducible.
pub fn random_preset_expression() -> &'static str {
    use rand::seq::IteratorRandom;
    let mut rng = rand::rng();
    PRESETS
        .iter()
        .choose(&mut rng)
        .map(|p| p.expression)
        .unwrap_or(PRESETS[0].expression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validate("not a cron expression").is_err());
    }

    #[test]
    fn test_validate_accepts_presets() {
        for preset in PRESETS {
            validate(preset.expression).unwrap_or_else(|e| {
                panic!("preset '{}' failed to validate: {}", preset.label, e)
            });
        }
    }

    #[test]
    fn test_canonical_form_is_idempotent() {
        let first = validate("0 0 * * * *").unwrap();
        let second = validate(&first.canonical).unwrap();
        assert_eq!(first.canonical, second.canonical);
    }

    #[test]
    fn test_random_preset_is_one_of_the_presets() {
        let expr = random_preset_expression();
        assert!(PRESETS.iter().any(|p| p.expression == expr));
    }

    #[test]
    fn test_validate_accepts_classic_five_field_syntax() {
        validate("0 3 * * *").expect("classic 5-field expression should parse");
    }

    #[test]
    fn test_validate_accepts_both_weekday_conventions_for_sunday() {
        let zero_based = validate("0 3 * * 0").unwrap();
        let seven_based = validate("0 3 * * 7").unwrap();
        assert_eq!(zero_based.canonical, seven_based.canonical);
    }

    #[test]
    fn test_validate_five_field_weekday_range_matches_six_field_equivalent() {
        // classic Mon-Fri (1-5) maps to the cron crate's 2-6 (Mon=2..Fri=6)
        let five_field = validate("0 9 * * 1-5").unwrap();
        let six_field = validate("0 0 9 * * 2-6").unwrap();
        assert_eq!(five_field.canonical, six_field.canonical);
    }
}
