// ✅ Value Validators - what a flag state value may look like
// Each condition can carry its own validator; boolean tokens are the fallback

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

// ============================================================================
// MESSAGES
// ============================================================================

pub const REQUIRED_MESSAGE: &str = "This field is required.";
pub const BOOLEAN_MESSAGE: &str = "Enter one of 'on', 'off', 'true', 'false', etc.";
pub const USER_MESSAGE: &str = "Enter a valid username.";
pub const PARAMETER_MESSAGE: &str = "Enter a valid HTTP parameter name.";
pub const PATH_MESSAGE: &str = "Enter a valid regular expression.";
pub const DATE_MESSAGE: &str = "Enter a valid date and time.";

// ============================================================================
// BOOLEAN TOKENS
// ============================================================================

const TRUE_TOKENS: &[&str] = &["y", "yes", "t", "true", "on", "1"];
const FALSE_TOKENS: &[&str] = &["n", "no", "f", "false", "off", "0"];

/// Parse a boolean-like token (case-insensitive, surrounding whitespace ignored).
///
/// Returns `None` for anything outside the token vocabulary.
pub fn strtobool(value: &str) -> Option<bool> {
    let token = value.trim().to_lowercase();

    if TRUE_TOKENS.contains(&token.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&token.as_str()) {
        Some(false)
    } else {
        None
    }
}

pub fn validate_boolean(value: &str) -> Result<(), String> {
    strtobool(value)
        .map(|_| ())
        .ok_or_else(|| BOOLEAN_MESSAGE.to_string())
}

// ============================================================================
// CONDITION-SPECIFIC VALIDATORS
// ============================================================================

pub fn validate_user(value: &str) -> Result<(), String> {
    if value.trim().is_empty() || value.chars().any(char::is_whitespace) {
        return Err(USER_MESSAGE.to_string());
    }
    Ok(())
}

fn parameter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[-_\w=]+$").expect("static pattern compiles"))
}

/// `name` or `name=expected`
pub fn validate_parameter(value: &str) -> Result<(), String> {
    if parameter_pattern().is_match(value) {
        Ok(())
    } else {
        Err(PARAMETER_MESSAGE.to_string())
    }
}

pub fn validate_path_re(value: &str) -> Result<(), String> {
    Regex::new(value)
        .map(|_| ())
        .map_err(|_| PATH_MESSAGE.to_string())
}

pub fn validate_date(value: &str) -> Result<(), String> {
    parse_date(value)
        .map(|_| ())
        .ok_or_else(|| DATE_MESSAGE.to_string())
}

// ============================================================================
// DATE PARSING
// ============================================================================

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a date for the date conditions.
///
/// Accepts RFC 3339, a naive date-time (interpreted as UTC) or a bare
/// `YYYY-MM-DD` (midnight UTC).
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ============================================================================
// TESTS
// ============================================================================
