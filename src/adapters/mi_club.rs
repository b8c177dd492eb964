use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};
use tracing::debug;

use super::{get_text, host_of, SiteAdapter};
use crate::error::FetchError;
use crate::normalize::{format_time, parse_time};
use crate::types::{AvailabilityRecord, FetchTask, SiteBatch, SiteParams, Slot, DATE_FMT};

/// MiClub public timesheet: one row per tee time, one cell per free place.
pub struct MiClubAdapter {
    client: reqwest::Client,
    /// Replaces `https://{domain}` when set.
    base_url: Option<String>,
}

impl MiClubAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, base_url: None }
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: Some(base_url.trim_end_matches('/').to_string()),
        }
    }

    fn timesheet_url(&self, domain: &str, resource: &str, fee_group: &str, date: NaiveDate) -> String {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{domain}"));
        format!(
            "{base}/guests/bookings/ViewPublicTimesheet.msp?bookingResourceId={resource}&selectedDate={}&feeGroupId={fee_group}",
            date.format("%Y-%m-%d")
        )
    }
}

#[async_trait]
impl SiteAdapter for MiClubAdapter {
    fn host(&self, task: &FetchTask) -> String {
        match (&self.base_url, &task.params) {
            (Some(base), _) => host_of(base),
            (None, SiteParams::MiClub { domain, .. }) => domain.clone(),
            (None, _) => task.venue.clone(),
        }
    }

    async fn fetch(&self, task: &FetchTask) -> Result<SiteBatch, FetchError> {
        let SiteParams::MiClub { domain, booking_resource_id, fee_group_id, holes } = &task.params
        else {
            return Err(FetchError::NoAdapter(task.params.kind().to_string()));
        };
        let url = self.timesheet_url(domain, booking_resource_id, fee_group_id, task.date);
        debug!(url = %url, holes, "Fetching golf timesheet");
        let html = get_text(&self.client, &url).await?;
        let records = parse_timesheet(&html, &task.venue, task.date, *holes, &url)?;
        Ok(SiteBatch::Records(records))
    }
}

/// Tee times with at least one free place, sorted by time.
pub fn parse_timesheet(
    html: &str,
    venue: &str,
    date: NaiveDate,
    holes: i64,
    link: &str,
) -> Result<Vec<AvailabilityRecord>, FetchError> {
    let doc = Html::parse_document(html);
    let row_sel = Selector::parse("div.row-time").map_err(|e| FetchError::Parse(e.to_string()))?;
    let h3_sel = Selector::parse("h3").map_err(|e| FetchError::Parse(e.to_string()))?;
    let free_sel =
        Selector::parse("div.cell-available").map_err(|e| FetchError::Parse(e.to_string()))?;

    let mut slots = Vec::new();
    for row in doc.select(&row_sel) {
        let Some(h3) = row.select(&h3_sel).next() else {
            continue;
        };
        let text: String = h3.text().collect();
        let Ok(time) = parse_time(text.trim()) else {
            continue;
        };
        let free = row.select(&free_sel).count();
        if free > 0 {
            slots.push((time, free as i64));
        }
    }
    slots.sort_by_key(|(t, _)| *t);
    slots.dedup_by_key(|(t, _)| *t);

    let fecha = date.format(DATE_FMT).to_string();
    Ok(slots
        .into_iter()
        .map(|(time, spots)| AvailabilityRecord {
            venue: venue.to_string(),
            date: fecha.clone(),
            time: format_time(time),
            link: link.to_string(),
            slot: Slot::Golf { holes, spots },
        })
        .collect())
}
