//! Time-of-day normalization.
//!
//! Sites report times as "21:00", "9:00pm", "09:00 PM", "9.30 p.m." and so on.
//! Everything stored is canonical `hh:mm AM/PM`; anything that cannot be read
//! is passed through unchanged.

use chrono::{Duration, NaiveTime, Timelike};

use crate::error::TimeFormatError;

/// Canonical output format.
pub const CANONICAL_FMT: &str = "%I:%M %p";

/// Accepted input formats, tried in order. The first match wins.
const INPUT_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"];

/// Parse a time-of-day string using the accepted format ladder.
pub fn parse_time(raw: &str) -> Result<NaiveTime, TimeFormatError> {
    let cleaned = clean(raw);
    INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&cleaned, fmt).ok())
        .ok_or_else(|| TimeFormatError(raw.to_string()))
}

/// Render a time in the canonical `hh:mm AM/PM` form.
pub fn format_time(t: NaiveTime) -> String {
    t.format(CANONICAL_FMT).to_string()
}

/// Canonicalize `raw`, or return it unchanged when no format matches.
pub fn normalize(raw: &str) -> String {
    match parse_time(raw) {
        Ok(t) => format_time(t),
        Err(_) => raw.to_string(),
    }
}

/// Round to the nearest half-hour bucket: :00-:14 down, :15-:44 to :30,
/// :45-:59 up to the next hour (wrapping past midnight).
pub fn round_time(t: NaiveTime) -> NaiveTime {
    let hour_start = t.with_minute(0).and_then(|h| h.with_second(0)).unwrap_or(t);
    let hour_start = hour_start.with_nanosecond(0).unwrap_or(hour_start);
    match t.minute() {
        0..=14 => hour_start,
        15..=44 => hour_start + Duration::minutes(30),
        _ => hour_start.overflowing_add_signed(Duration::hours(1)).0,
    }
}

/// String form of [`round_time`]. Unparseable input is returned unchanged.
pub fn round_to_half_hour(canonical: &str) -> String {
    match parse_time(canonical) {
        Ok(t) => format_time(round_time(t)),
        Err(_) => canonical.to_string(),
    }
}

fn clean(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    let collapsed = upper
        .replace("A.M.", "AM")
        .replace("P.M.", "PM")
        .replace("A.M", "AM")
        .replace("P.M", "PM");
    // Any period left is an hour/minute separator ("9.30PM").
    collapsed.replace('.', ":")
}
