//! Date coercion rules shared by the normalizer and the `format_date` template filter.
//!
//! A value is coerced when it sits under a key that [`is_date_key`] accepts. Parsing is
//! attempted as epoch seconds, then ISO-8601, then [`DATE_FORMATS`] in order. Successful
//! parses render as `DD.MM.YYYY`; anything else is handed back untouched.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::Value;

/// Token rendered for keys that are absent from the data.
pub const DEFAULT_TOKEN: &str = "-";

/// Canonical output format (`15.03.2024`).
pub const OUTPUT_FORMAT: &str = "%d.%m.%Y";

/// Fallback date layouts, tried in order after ISO-8601.
pub const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const ISO_DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Values that mean "no date" and are never parsed.
const EMPTY_MARKERS: [&str; 3] = ["", DEFAULT_TOKEN, "–"];

/// Key-name policy: a key is a date field when it contains `date`, ignoring case.
///
/// `startDate`, `DATE_OF_BIRTH` and `update` all match.
pub fn is_date_key(key: &str) -> bool {
    key.to_lowercase().contains("date")
}

/// Formats a JSON value as `DD.MM.YYYY`, or returns it unchanged when it is not a date.
pub fn format_date(value: &Value) -> Value {
    let formatted = match value {
        Value::Number(number) => number.as_f64().and_then(format_epoch),
        Value::String(text) => format_date_text(text),
        _ => None,
    };

    match formatted {
        Some(text) => Value::String(text),
        None => {
            if !is_empty_marker(value) {
                log::debug!("[format_date] leaving unparseable value as is: {}", value);
            }
            value.clone()
        }
    }
}

/// Formats epoch seconds as a local calendar date.
pub fn format_epoch(seconds: f64) -> Option<String> {
    parse_epoch(seconds).map(|date| date.format(OUTPUT_FORMAT).to_string())
}

/// Formats a textual date, `None` when no known layout matches.
pub fn format_date_text(text: &str) -> Option<String> {
    parse_date_text(text).map(|date| date.format(OUTPUT_FORMAT).to_string())
}

pub fn parse_epoch(seconds: f64) -> Option<NaiveDate> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0) as u32;
    Local
        .timestamp_opt(whole as i64, nanos)
        .single()
        .map(|datetime| datetime.date_naive())
}

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if EMPTY_MARKERS.contains(&text) {
        return None;
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive());
    }
    if let Some(datetime) = ISO_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    {
        return Some(datetime.date());
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn is_empty_marker(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => EMPTY_MARKERS.contains(&text.trim()),
        _ => false,
    }
}
