use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};
use tracing::debug;

use super::{get_text, host_of, SiteAdapter};
use crate::config::TENNIS_VENUES_URL;
use crate::error::FetchError;
use crate::normalize::normalize;
use crate::types::{AvailabilityRecord, FetchTask, SiteBatch, SiteParams, Slot, DATE_FMT};

const UNKNOWN_COURT: &str = "unknown";

/// tennisvenues.com.au booking grid: one link per free court/time cell.
pub struct TennisVenuesAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl TennisVenuesAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, TENNIS_VENUES_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SiteAdapter for TennisVenuesAdapter {
    fn host(&self, _task: &FetchTask) -> String {
        host_of(&self.base_url)
    }

    async fn fetch(&self, task: &FetchTask) -> Result<SiteBatch, FetchError> {
        let SiteParams::TennisVenues { slug } = &task.params else {
            return Err(FetchError::NoAdapter(task.params.kind().to_string()));
        };
        let url = format!(
            "{}/booking/{}?date={}",
            self.base_url,
            slug,
            task.date.format(DATE_FMT)
        );
        debug!(url = %url, "Fetching tennis grid");
        let html = get_text(&self.client, &url).await?;
        let records = parse_grid(&html, &task.venue, task.date, &self.base_url)?;
        Ok(SiteBatch::Records(records))
    }
}

/// Extract available cells from a booking grid page.
///
/// A page without any `td.TimeCell` is not a booking grid. A grid with no
/// available cells is a fully booked day and yields no records.
pub fn parse_grid(
    html: &str,
    venue: &str,
    date: NaiveDate,
    base_url: &str,
) -> Result<Vec<AvailabilityRecord>, FetchError> {
    let doc = Html::parse_document(html);
    let cell_sel = Selector::parse("td.TimeCell").map_err(|e| FetchError::Parse(e.to_string()))?;
    let link_sel = Selector::parse("td.TimeCell.Available a")
        .map_err(|e| FetchError::Parse(e.to_string()))?;

    if doc.select(&cell_sel).next().is_none() {
        return Err(FetchError::SelectorNotFound("td.TimeCell".to_string()));
    }

    let base = url::Url::parse(base_url).map_err(|e| FetchError::Parse(e.to_string()))?;
    let fecha = date.format(DATE_FMT).to_string();
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for a in doc.select(&link_sel) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(full) = base.join(href) else {
            continue;
        };
        let court = full
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_else(|| UNKNOWN_COURT.to_string());
        let text: String = a.text().collect();
        let record = AvailabilityRecord {
            venue: venue.to_string(),
            date: fecha.clone(),
            time: normalize(text.trim()),
            link: full.to_string(),
            slot: Slot::Tennis { court },
        };
        if seen.insert((record.time.clone(), record.slot.clone())) {
            records.push(record);
        }
    }
    Ok(records)
}
