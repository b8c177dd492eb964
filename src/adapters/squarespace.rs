use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{host_of, SiteAdapter};
use crate::config::SQUARESPACE_URL;
use crate::error::FetchError;
use crate::expander::NO_COURT;
use crate::normalize::format_time;
use crate::types::{AvailabilityRecord, FetchTask, SiteBatch, SiteParams, Slot, DATE_FMT};

/// Squarespace Scheduling availability API. Each appointment type is a fixed
/// duration, so slots arrive already shaped as bookable windows.
pub struct SquarespaceAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TimeSlot {
    time: String,
}

impl SquarespaceAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, SQUARESPACE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SiteAdapter for SquarespaceAdapter {
    fn host(&self, _task: &FetchTask) -> String {
        host_of(&self.base_url)
    }

    async fn fetch(&self, task: &FetchTask) -> Result<SiteBatch, FetchError> {
        let SiteParams::Squarespace { owner, appointment_type_id, minutes, timezone, category } =
            &task.params
        else {
            return Err(FetchError::NoAdapter(task.params.kind().to_string()));
        };
        let url = format!("{}/api/scheduling/v1/availability/times", self.base_url);
        let start_date = task.date.format("%Y-%m-%d").to_string();
        debug!(url = %url, appointment_type_id = %appointment_type_id, date = %start_date, "Fetching futsal times");

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("owner", owner.as_str()),
                ("appointmentTypeId", appointment_type_id.as_str()),
                ("calendarId", "any"),
                ("startDate", start_date.as_str()),
                ("maxDays", "1"),
                ("timezone", timezone.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;

        let records = parse_times(
            &body,
            &task.venue,
            *minutes,
            &self.base_url,
            owner,
            appointment_type_id,
            category,
        )?;
        Ok(SiteBatch::Records(records))
    }
}

/// Turn the `{ "<date>": [ { "time": "<iso>" }, ... ] }` payload into records.
pub fn parse_times(
    body: &str,
    venue: &str,
    minutes: i64,
    base_url: &str,
    owner: &str,
    appointment_type_id: &str,
    category: &str,
) -> Result<Vec<AvailabilityRecord>, FetchError> {
    let days: BTreeMap<String, Vec<TimeSlot>> =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let mut slots: Vec<(DateTime<FixedOffset>, String)> = Vec::new();
    for slot in days.into_values().flatten() {
        match parse_slot_time(&slot.time) {
            Some(dt) => slots.push((dt, slot.time)),
            None => warn!(venue = %venue, time = %slot.time, "Skipping unparseable slot time"),
        }
    }
    slots.sort_by_key(|(dt, _)| *dt);
    slots.dedup_by_key(|(dt, _)| *dt);

    let mut records = Vec::with_capacity(slots.len());
    for (dt, raw) in slots {
        records.push(AvailabilityRecord {
            venue: venue.to_string(),
            date: dt.format(DATE_FMT).to_string(),
            time: format_time(dt.time()),
            link: booking_link(base_url, owner, appointment_type_id, &raw, category)?,
            slot: Slot::Futsal {
                minutes,
                court: NO_COURT.to_string(),
            },
        });
    }
    Ok(records)
}

/// Slot times carry their own offset, e.g. `2025-05-28T18:00:00+1000`.
fn parse_slot_time(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
}

fn booking_link(
    base_url: &str,
    owner: &str,
    appointment_type_id: &str,
    time: &str,
    category: &str,
) -> Result<String, FetchError> {
    let mut url = url::Url::parse(base_url).map_err(|e| FetchError::Parse(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| FetchError::Parse(format!("cannot build booking link on {base_url}")))?
        .extend([
            "schedule",
            owner,
            "appointment",
            appointment_type_id,
            "calendar",
            "any",
            "datetime",
            time,
        ]);
    url.query_pairs_mut().append_pair("categories[]", category);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sport;
    use chrono::NaiveDate;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = r#"{
        "2025-05-28": [
            { "time": "2025-05-28T18:00:00+1000", "slotsAvailable": 1 },
            { "time": "2025-05-28T09:30:00+10:00", "slotsAvailable": 1 },
            { "time": "garbage" }
        ]
    }"#;

    #[test]
    fn parses_offset_times_in_local_wall_clock() {
        let records = parse_times(BODY, "Kikoff Harbord", 90, SQUARESPACE_URL, "d84901c1", "40598384", "Pitch Hire")
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, "09:30 AM");
        assert_eq!(records[1].time, "06:00 PM");
        assert!(records.iter().all(|r| r.date == "20250528"));
        assert_eq!(
            records[0].slot,
            Slot::Futsal { minutes: 90, court: NO_COURT.to_string() }
        );
    }

    #[test]
    fn booking_link_points_at_the_slot() {
        let records = parse_times(BODY, "K", 60, SQUARESPACE_URL, "d84901c1", "39069226", "Pitch Hire")
            .unwrap();
        let link = &records[0].link;
        assert!(link.starts_with(
            "https://app.squarespacescheduling.com/schedule/d84901c1/appointment/39069226/calendar/any/datetime/"
        ));
        assert!(link.contains("2025-05-28T09:30:00"));
        assert!(link.ends_with("categories%5B%5D=Pitch+Hire"));
    }

    #[test]
    fn non_json_body_is_a_parse_error() {
        let err = parse_times("<html>", "K", 60, SQUARESPACE_URL, "o", "a", "c").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn queries_one_day_for_the_appointment_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/scheduling/v1/availability/times"))
            .and(query_param("appointmentTypeId", "39069226"))
            .and(query_param("startDate", "2025-05-28"))
            .and(query_param("maxDays", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;

        let adapter = SquarespaceAdapter::with_base_url(reqwest::Client::new(), &server.uri());
        let task = FetchTask {
            sport: Sport::Futsal,
            venue: "Kikoff Harbord".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 5, 28).unwrap(),
            params: SiteParams::Squarespace {
                owner: "d84901c1".to_string(),
                appointment_type_id: "39069226".to_string(),
                minutes: 60,
                timezone: "Australia/Sydney".to_string(),
                category: "Pitch Hire".to_string(),
            },
        };
        let SiteBatch::Records(records) = adapter.fetch(&task).await.unwrap() else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
    }
}
