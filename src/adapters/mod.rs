//! Site adapters: one pluggable unit per booking site.
//!
//! An adapter turns one [`FetchTask`] into raw availability for that task's
//! key, or a [`FetchError`]. Adapters never touch the store; the orchestrator
//! decides what a failure means.

pub mod mi_club;
pub mod squarespace;
pub mod tennis_venues;
pub mod yep_booking;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::config::Config;
use crate::error::{AppError, FetchError};
use crate::types::{FetchTask, SiteBatch, SiteKind};

pub use mi_club::MiClubAdapter;
pub use squarespace::SquarespaceAdapter;
pub use tennis_venues::TennisVenuesAdapter;
pub use yep_booking::YepBookingAdapter;

#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Upstream host the politeness policy spaces requests against.
    fn host(&self, task: &FetchTask) -> String;

    async fn fetch(&self, task: &FetchTask) -> Result<SiteBatch, FetchError>;
}

/// Dispatches each task to the adapter registered for its site.
#[derive(Default, Clone)]
pub struct AdapterSet {
    adapters: HashMap<SiteKind, Arc<dyn SiteAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All production adapters sharing one HTTP client.
    pub fn http(cfg: &Config) -> Result<Self, AppError> {
        let client = build_client(cfg)?;
        Ok(Self::new()
            .with(SiteKind::TennisVenues, Arc::new(TennisVenuesAdapter::new(client.clone())))
            .with(SiteKind::MiClub, Arc::new(MiClubAdapter::new(client.clone())))
            .with(SiteKind::Squarespace, Arc::new(SquarespaceAdapter::new(client.clone())))
            .with(SiteKind::YepBooking, Arc::new(YepBookingAdapter::new(client))))
    }

    pub fn with(mut self, kind: SiteKind, adapter: Arc<dyn SiteAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }
}

#[async_trait]
impl SiteAdapter for AdapterSet {
    fn host(&self, task: &FetchTask) -> String {
        self.adapters
            .get(&task.params.kind())
            .map(|a| a.host(task))
            .unwrap_or_else(|| task.params.kind().to_string())
    }

    async fn fetch(&self, task: &FetchTask) -> Result<SiteBatch, FetchError> {
        let kind = task.params.kind();
        let adapter = self
            .adapters
            .get(&kind)
            .ok_or_else(|| FetchError::NoAdapter(kind.to_string()))?;
        adapter.fetch(task).await
    }
}

pub fn build_client(cfg: &Config) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
    );
    let client = reqwest::Client::builder()
        .user_agent(cfg.user_agent.as_str())
        .default_headers(headers)
        .timeout(cfg.fetch_timeout)
        .build()?;
    Ok(client)
}

/// GET `url` and return the body, mapping non-2xx to `FetchError::Status`.
pub(crate) async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    Ok(resp.text().await?)
}

/// Host component of `url`, or the whole string when it does not parse.
pub(crate) fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SiteParams, Sport};
    use chrono::NaiveDate;

    fn yep_task() -> FetchTask {
        FetchTask {
            sport: Sport::Futsal,
            venue: "Pittwater RSL".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 5, 28).unwrap(),
            params: SiteParams::YepBooking {
                url_template: "https://pittwater.example/?date={date}".to_string(),
                link: "https://pittwater.example/".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn unregistered_site_is_a_fetch_error() {
        let set = AdapterSet::new();
        let err = set.fetch(&yep_task()).await.unwrap_err();
        assert!(matches!(err, FetchError::NoAdapter(ref s) if s == "yep_booking"));
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://www.tennisvenues.com.au/booking/x"), "www.tennisvenues.com.au");
        assert_eq!(host_of("not a url"), "not a url");
        let set = AdapterSet::http(&Config::default()).unwrap();
        assert_eq!(set.host(&yep_task()), "pittwater.example");
    }
}
