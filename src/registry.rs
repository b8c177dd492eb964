//! Venue registry: which venues are scraped, per sport, and with which
//! site-specific parameters. Loaded once at startup.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::types::{FetchTask, SiteParams, Sport};

/// One configured venue, tagged by the booking site it lives on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "site", rename_all = "snake_case")]
pub enum VenueEntry {
    TennisVenues {
        venue: String,
        /// Path segment on tennisvenues.com.au; defaults to `venue`.
        #[serde(default)]
        slug: Option<String>,
    },
    MiClub {
        venue: String,
        domain: String,
        booking_resource_id: String,
        /// Hole count → fee group id.
        fee_groups: BTreeMap<String, String>,
    },
    Squarespace {
        venue: String,
        owner: String,
        /// Duration in minutes → appointment type id.
        appointment_types: BTreeMap<String, String>,
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default = "default_category")]
        category: String,
    },
    YepBooking {
        venue: String,
        /// Page URL with a `{date}` placeholder (YYYY-MM-DD).
        url_template: String,
        /// Booking link stored on every record.
        link: String,
    },
}

fn default_timezone() -> String {
    "Australia/Sydney".to_string()
}

fn default_category() -> String {
    "Pitch Hire".to_string()
}

impl VenueEntry {
    pub fn venue(&self) -> &str {
        match self {
            VenueEntry::TennisVenues { venue, .. }
            | VenueEntry::MiClub { venue, .. }
            | VenueEntry::Squarespace { venue, .. }
            | VenueEntry::YepBooking { venue, .. } => venue,
        }
    }

    /// Site parameters for every fetch this venue needs on one date.
    fn params(&self) -> Result<Vec<SiteParams>> {
        let params = match self {
            VenueEntry::TennisVenues { venue, slug } => vec![SiteParams::TennisVenues {
                slug: slug.clone().unwrap_or_else(|| venue.clone()),
            }],
            VenueEntry::MiClub { venue, domain, booking_resource_id, fee_groups } => fee_groups
                .iter()
                .map(|(holes, fee_group_id)| {
                    let holes = holes.parse::<i64>().map_err(|_| {
                        AppError::Config(format!("{venue}: fee group key `{holes}` is not a hole count"))
                    })?;
                    Ok(SiteParams::MiClub {
                        domain: domain.clone(),
                        booking_resource_id: booking_resource_id.clone(),
                        fee_group_id: fee_group_id.clone(),
                        holes,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            VenueEntry::Squarespace { venue, owner, appointment_types, timezone, category } => {
                appointment_types
                    .iter()
                    .map(|(minutes, appointment_type_id)| {
                        let minutes = minutes.parse::<i64>().map_err(|_| {
                            AppError::Config(format!("{venue}: appointment key `{minutes}` is not minutes"))
                        })?;
                        Ok(SiteParams::Squarespace {
                            owner: owner.clone(),
                            appointment_type_id: appointment_type_id.clone(),
                            minutes,
                            timezone: timezone.clone(),
                            category: category.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            VenueEntry::YepBooking { venue, url_template, link } => {
                if !url_template.contains("{date}") {
                    return Err(AppError::Config(format!(
                        "{venue}: url_template must contain a {{date}} placeholder"
                    )));
                }
                vec![SiteParams::YepBooking {
                    url_template: url_template.clone(),
                    link: link.clone(),
                }]
            }
        };
        Ok(params)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VenueRegistry {
    #[serde(default)]
    pub tennis: Vec<VenueEntry>,
    #[serde(default)]
    pub golf: Vec<VenueEntry>,
    #[serde(default)]
    pub futsal: Vec<VenueEntry>,
}

impl VenueRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("could not read venue registry {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let registry: VenueRegistry = serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("malformed venue registry: {e}")))?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn entries(&self, sport: Sport) -> &[VenueEntry] {
        match sport {
            Sport::Tennis => &self.tennis,
            Sport::Golf => &self.golf,
            Sport::Futsal => &self.futsal,
        }
    }

    pub fn venue_count(&self) -> usize {
        Sport::ALL.iter().map(|s| self.entries(*s).len()).sum()
    }

    /// Every (venue, date, params) fetch for `days` dates starting at `today`,
    /// ordered date-major so the first pass covers the nearest day.
    pub fn tasks(&self, today: NaiveDate, days: u32) -> Result<Vec<FetchTask>> {
        let mut tasks = Vec::new();
        for offset in 0..days {
            let date = today + Duration::days(i64::from(offset));
            for sport in Sport::ALL {
                for entry in self.entries(sport) {
                    for params in entry.params()? {
                        tasks.push(FetchTask {
                            sport,
                            venue: entry.venue().to_string(),
                            date,
                            params,
                        });
                    }
                }
            }
        }
        Ok(tasks)
    }

    fn validate(&self) -> Result<()> {
        for sport in Sport::ALL {
            for entry in self.entries(sport) {
                if entry.venue().trim().is_empty() {
                    return Err(AppError::Config(format!("{sport} venue with empty name")));
                }
                let allowed = matches!(
                    (sport, entry),
                    (Sport::Tennis, VenueEntry::TennisVenues { .. })
                        | (Sport::Golf, VenueEntry::MiClub { .. })
                        | (Sport::Futsal, VenueEntry::Squarespace { .. })
                        | (Sport::Futsal, VenueEntry::YepBooking { .. })
                );
                if !allowed {
                    return Err(AppError::Config(format!(
                        "{}: site type is not valid for {sport}",
                        entry.venue()
                    )));
                }
                entry.params()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "tennis": [
            { "site": "tennis_venues", "venue": "collaroy-tc" },
            { "site": "tennis_venues", "venue": "Manly Lawn", "slug": "manly-lawn-tc" }
        ],
        "golf": [
            { "site": "mi_club", "venue": "Long Reef", "domain": "longreef.miclub.com.au",
              "booking_resource_id": "3000000", "fee_groups": { "9": "1500", "18": "1600" } }
        ],
        "futsal": [
            { "site": "squarespace", "venue": "Kikoff Harbord", "owner": "d84901c1",
              "appointment_types": { "60": "39069226", "90": "40598384" } },
            { "site": "yep_booking", "venue": "Pittwater RSL",
              "url_template": "https://pittwater.example/?date={date}", "link": "https://pittwater.example/" }
        ]
    }"#;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 28).unwrap()
    }

    #[test]
    fn expands_one_task_per_fetch_parameter_set() {
        let registry = VenueRegistry::from_json(SAMPLE).unwrap();
        assert_eq!(registry.venue_count(), 5);

        // 2 tennis + 2 golf fee groups + 2 squarespace durations + 1 yepbooking
        let tasks = registry.tasks(today(), 2).unwrap();
        assert_eq!(tasks.len(), 14);
        assert!(tasks[..7].iter().all(|t| t.date == today()));

        let manly = tasks.iter().find(|t| t.venue == "Manly Lawn").unwrap();
        assert_eq!(manly.params, SiteParams::TennisVenues { slug: "manly-lawn-tc".to_string() });

        let holes: Vec<i64> = tasks
            .iter()
            .filter(|t| t.date == today())
            .filter_map(|t| match &t.params {
                SiteParams::MiClub { holes, .. } => Some(*holes),
                _ => None,
            })
            .collect();
        assert_eq!(holes, vec![18, 9]);
    }

    #[test]
    fn rejects_site_under_wrong_sport() {
        let raw = r#"{ "golf": [ { "site": "tennis_venues", "venue": "x" } ] }"#;
        assert!(matches!(VenueRegistry::from_json(raw), Err(AppError::Config(_))));
    }

    #[test]
    fn rejects_malformed_json_and_bad_keys() {
        assert!(matches!(VenueRegistry::from_json("{ nope"), Err(AppError::Config(_))));
        let raw = r#"{ "golf": [ { "site": "mi_club", "venue": "x", "domain": "d",
            "booking_resource_id": "1", "fee_groups": { "nine": "1" } } ] }"#;
        assert!(matches!(VenueRegistry::from_json(raw), Err(AppError::Config(_))));
    }

    #[test]
    fn yepbooking_template_needs_date_placeholder() {
        let raw = r#"{ "futsal": [ { "site": "yep_booking", "venue": "x",
            "url_template": "https://x/", "link": "https://x/" } ] }"#;
        assert!(matches!(VenueRegistry::from_json(raw), Err(AppError::Config(_))));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        assert!(matches!(
            VenueRegistry::load("/definitely/not/here.json"),
            Err(AppError::Config(_))
        ));
    }
}
