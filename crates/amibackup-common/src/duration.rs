//! Duration shorthand used on the command line
//!
//! Accepts one or more `<integer><unit>` groups where unit is `d`, `h`, `m`
//! or `s`, e.g. `7d`, `36h`, `1d12h`, `90m`. A bare number is rejected so
//! `-p 1:4:30` cannot silently mean seconds.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while parsing a duration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("missing unit after {number} in '{input}' (expected d, h, m or s)")]
    MissingUnit { input: String, number: u64 },

    #[error("unknown unit '{unit}' in '{input}' (expected d, h, m or s)")]
    UnknownUnit { input: String, unit: char },

    #[error("expected a number in '{input}'")]
    ExpectedNumber { input: String },

    #[error("duration '{input}' is too large")]
    Overflow { input: String },
}

fn unit_seconds(unit: char) -> Option<u64> {
    match unit {
        'd' => Some(86_400),
        'h' => Some(3_600),
        'm' => Some(60),
        's' => Some(1),
        _ => None,
    }
}

/// Parse a duration in day/hour/minute/second shorthand.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    let mut total: u64 = 0;
    let mut chars = trimmed.chars().peekable();

    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(c);
            chars.next();
        }
        if digits.is_empty() {
            return Err(DurationError::ExpectedNumber {
                input: input.to_string(),
            });
        }
        let number: u64 = digits.parse().map_err(|_| DurationError::Overflow {
            input: input.to_string(),
        })?;

        let unit = chars.next().ok_or_else(|| DurationError::MissingUnit {
            input: input.to_string(),
            number,
        })?;
        let scale = unit_seconds(unit).ok_or_else(|| DurationError::UnknownUnit {
            input: input.to_string(),
            unit,
        })?;

        total = number
            .checked_mul(scale)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| DurationError::Overflow {
                input: input.to_string(),
            })?;
    }

    Ok(Duration::from_secs(total))
}
