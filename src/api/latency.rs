//! Fetch latency per sport, served by `/stats/latency`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::types::Sport;

/// Slowest fetch worth tracking. Longer samples clamp to it.
const CEILING_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl Percentiles {
    fn of(h: &Histogram<u64>) -> Self {
        if h.is_empty() {
            return Self::default();
        }
        Self {
            samples: h.len(),
            p50_ms: Some(h.value_at_quantile(0.50)),
            p95_ms: Some(h.value_at_quantile(0.95)),
            p99_ms: Some(h.value_at_quantile(0.99)),
            max_ms: Some(h.max()),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct LatencySummary {
    #[serde(flatten)]
    pub overall: Percentiles,
    pub by_sport: BTreeMap<Sport, Percentiles>,
}

/// One histogram per sport, created on the first sample.
#[derive(Default)]
pub struct FetchLatency {
    per_sport: Mutex<BTreeMap<Sport, Histogram<u64>>>,
}

fn histogram() -> Option<Histogram<u64>> {
    Histogram::new_with_bounds(1, CEILING_MS, 2).ok()
}

impl FetchLatency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, sport: Sport, took: Duration) {
        let ms = u64::try_from(took.as_millis()).unwrap_or(u64::MAX).clamp(1, CEILING_MS);
        let Ok(mut per_sport) = self.per_sport.lock() else {
            return;
        };
        if !per_sport.contains_key(&sport) {
            let Some(h) = histogram() else { return };
            per_sport.insert(sport, h);
        }
        if let Some(h) = per_sport.get_mut(&sport) {
            let _ = h.record(ms);
        }
    }

    /// Overall figures are read from the per-sport histograms merged together.
    pub fn summary(&self) -> LatencySummary {
        let Ok(per_sport) = self.per_sport.lock() else {
            return LatencySummary::default();
        };
        let mut merged = histogram();
        let mut by_sport = BTreeMap::new();
        for (sport, h) in per_sport.iter() {
            if let Some(m) = merged.as_mut() {
                let _ = m.add(h);
            }
            by_sport.insert(*sport, Percentiles::of(h));
        }
        LatencySummary {
            overall: merged.as_ref().map(Percentiles::of).unwrap_or_default(),
            by_sport,
        }
    }
}
