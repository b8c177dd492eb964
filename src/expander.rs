//! Expansion of open time ranges into fixed-duration bookable windows.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::warn;

use crate::config::SLOT_MINUTES;
use crate::normalize::format_time;
use crate::types::{AvailabilityRecord, AvailabilityWindow, RawSlotFragment, Slot, DATE_FMT};

/// Court label used when a site does not report one.
pub const NO_COURT: &str = "N/A";

/// Expand fragments that all share one (venue, court, date) key.
///
/// A window `(t, D)` is produced only when every half-hour unit in `[t, t+D)`
/// is covered by some fragment. Longer windows do not suppress shorter ones
/// starting at the same instant.
pub fn expand_windows(fragments: &[RawSlotFragment], durations: &[u32]) -> Vec<AvailabilityWindow> {
    let mut spans: Vec<(NaiveDateTime, NaiveDateTime)> = fragments
        .iter()
        .filter_map(|f| {
            if f.start_time >= f.end_time {
                warn!(
                    venue = %f.venue,
                    date = %f.date,
                    start = %f.start_time,
                    end = %f.end_time,
                    "Discarding malformed fragment (start >= end)"
                );
                return None;
            }
            Some((f.date.and_time(f.start_time), f.date.and_time(f.end_time)))
        })
        .collect();
    spans.sort();

    let unit = Duration::minutes(i64::from(SLOT_MINUTES));
    let mut coverage: BTreeSet<NaiveDateTime> = BTreeSet::new();
    for (start, end) in spans {
        let mut t = align_up(start);
        while t + unit <= end {
            coverage.insert(t);
            t += unit;
        }
    }

    let mut windows = Vec::new();
    for &t in &coverage {
        for &minutes in durations {
            let units = minutes / SLOT_MINUTES;
            if units == 0 {
                continue;
            }
            let covered = (0..units).all(|k| coverage.contains(&(t + unit * k as i32)));
            if covered {
                windows.push(AvailabilityWindow { start: t, minutes });
            }
        }
    }
    windows
}

/// Group a mixed batch by (venue, court, date), expand each group and turn
/// the windows into futsal-style records carrying `link`.
pub fn expand_fragments(
    fragments: &[RawSlotFragment],
    durations: &[u32],
    link: &str,
) -> Vec<AvailabilityRecord> {
    let mut groups: BTreeMap<(String, String, chrono::NaiveDate), Vec<RawSlotFragment>> = BTreeMap::new();
    for f in fragments {
        let court = f.court.clone().unwrap_or_else(|| NO_COURT.to_string());
        groups
            .entry((f.venue.clone(), court, f.date))
            .or_default()
            .push(f.clone());
    }

    let mut records = Vec::new();
    for ((venue, court, _), group) in groups {
        for w in expand_windows(&group, durations) {
            records.push(AvailabilityRecord {
                venue: venue.clone(),
                date: w.start.date().format(DATE_FMT).to_string(),
                time: format_time(w.start.time()),
                link: link.to_string(),
                slot: Slot::Futsal {
                    minutes: i64::from(w.minutes),
                    court: court.clone(),
                },
            });
        }
    }
    records
}

/// Smallest half-hour boundary at or after `t`.
fn align_up(t: NaiveDateTime) -> NaiveDateTime {
    let minute = t.minute();
    let base = t
        .with_second(0)
        .and_then(|x| x.with_nanosecond(0))
        .unwrap_or(t);
    let exact = t.second() == 0 && t.nanosecond() == 0;
    match minute {
        0 | 30 if exact => base,
        0..=29 => base.with_minute(30).unwrap_or(base),
        _ => base.with_minute(0).unwrap_or(base) + Duration::hours(1),
    }
}
