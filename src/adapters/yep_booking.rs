use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};
use tracing::debug;

use super::{get_text, host_of, SiteAdapter};
use crate::error::FetchError;
use crate::normalize::parse_time;
use crate::types::{FetchTask, RawSlotFragment, SiteBatch, SiteParams};

/// Day-header formats tried when checking which date a page shows.
const HEADER_FORMATS: &[&str] = &["%A %d %B %Y", "%A, %d %B %Y", "%d %B %Y", "%d/%m/%Y", "%Y-%m-%d"];

/// YepBooking day view. Free cells are `a.empty` links titled
/// `"9:00am–10:00am - Available"` with the court number first in `lc`.
pub struct YepBookingAdapter {
    client: reqwest::Client,
}

impl YepBookingAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SiteAdapter for YepBookingAdapter {
    fn host(&self, task: &FetchTask) -> String {
        match &task.params {
            SiteParams::YepBooking { url_template, .. } => host_of(url_template),
            _ => task.venue.clone(),
        }
    }

    async fn fetch(&self, task: &FetchTask) -> Result<SiteBatch, FetchError> {
        let SiteParams::YepBooking { url_template, link } = &task.params else {
            return Err(FetchError::NoAdapter(task.params.kind().to_string()));
        };
        let url = url_template.replace("{date}", &task.date.format("%Y-%m-%d").to_string());
        debug!(url = %url, "Fetching futsal day view");
        let html = get_text(&self.client, &url).await?;
        let fragments = parse_day(&html, &task.venue, task.date)?;
        Ok(SiteBatch::Fragments {
            fragments,
            link: link.clone(),
        })
    }
}

/// Collect available fragments from a day view.
///
/// When the page's `h3` header names a different day than requested, the
/// page is rejected rather than filed under the wrong date.
pub fn parse_day(html: &str, venue: &str, date: NaiveDate) -> Result<Vec<RawSlotFragment>, FetchError> {
    let doc = Html::parse_document(html);
    let h3_sel = Selector::parse("h3").map_err(|e| FetchError::Parse(e.to_string()))?;
    let slot_sel = Selector::parse("a.empty").map_err(|e| FetchError::Parse(e.to_string()))?;

    if let Some(h3) = doc.select(&h3_sel).next() {
        let header: String = h3.text().collect();
        if let Some(shown) = parse_header_date(header.trim()) {
            if shown != date {
                return Err(FetchError::Parse(format!(
                    "page shows {shown}, expected {date}"
                )));
            }
        }
    }

    let mut fragments = Vec::new();
    for a in doc.select(&slot_sel) {
        let el = a.value();
        let Some(title) = el.attr("title").or_else(|| el.attr("aria-label")) else {
            continue;
        };
        let Some(lc) = el.attr("lc") else {
            continue;
        };
        if !title.contains("Available") {
            continue;
        }
        match parse_slot(title, lc) {
            Some((start_time, end_time, court)) => fragments.push(RawSlotFragment {
                venue: venue.to_string(),
                date,
                court: Some(court),
                start_time,
                end_time,
            }),
            None => debug!(title = %title, lc = %lc, "Skipping unreadable slot"),
        }
    }
    Ok(fragments)
}

fn parse_slot(title: &str, lc: &str) -> Option<(chrono::NaiveTime, chrono::NaiveTime, String)> {
    let range = title.split(" - ").next()?;
    let (start, end) = range.split_once('–')?;
    let start = parse_time(start.trim()).ok()?;
    let end = parse_time(end.trim()).ok()?;
    let court = lc.split('|').next()?.trim();
    if court.is_empty() {
        return None;
    }
    Some((start, end, format!("Court {court}")))
}

fn parse_header_date(header: &str) -> Option<NaiveDate> {
    HEADER_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(header, fmt).ok())
}
