//! Bounded-concurrency fetch orchestration.
//!
//! At most `max_concurrent` tasks hold an admission permit at once. A task
//! keeps its permit through the post-task cool-down, so the gate also paces
//! the run. Every adapter failure degrades to an empty outcome for that key.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::adapters::SiteAdapter;
use crate::api::health::HealthState;
use crate::api::latency::FetchLatency;
use crate::config::Config;
use crate::error::FetchError;
use crate::expander::expand_fragments;
use crate::types::{FetchTask, SiteBatch, TaskOutcome};

// ---------------------------------------------------------------------------
// PolitenessPolicy
// ---------------------------------------------------------------------------

/// How hard the orchestrator is allowed to lean on upstream sites.
pub struct PolitenessPolicy {
    /// Cool-down a task sleeps through before releasing its slot.
    after_task: Duration,
    /// Minimum spacing between request starts against the same host.
    host_interval: Duration,
    /// host → earliest instant the next request may start.
    next_slot: DashMap<String, Instant>,
}

impl PolitenessPolicy {
    pub fn new(after_task: Duration, host_interval: Duration) -> Self {
        Self {
            after_task,
            host_interval,
            next_slot: DashMap::new(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.politeness_delay, cfg.host_min_interval)
    }

    pub fn after_task(&self) -> Duration {
        self.after_task
    }

    /// Book the next start slot for `host` and return how long to wait for it.
    pub fn reserve(&self, host: &str) -> Duration {
        if self.host_interval.is_zero() {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let mut slot = self.next_slot.entry(host.to_string()).or_insert(now);
        let start = (*slot).max(now);
        *slot = start + self.host_interval;
        start - now
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    adapter: Arc<dyn SiteAdapter>,
    max_concurrent: usize,
    fetch_timeout: Duration,
    durations: Vec<u32>,
    politeness: Arc<PolitenessPolicy>,
    latency: Arc<FetchLatency>,
    health: Arc<HealthState>,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        cfg: &Config,
        politeness: Arc<PolitenessPolicy>,
        latency: Arc<FetchLatency>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            adapter,
            max_concurrent: cfg.max_concurrent.max(1),
            fetch_timeout: cfg.fetch_timeout,
            durations: cfg.slot_durations.clone(),
            politeness,
            latency,
            health,
        }
    }

    /// Run every task and return the outcomes in completion order.
    ///
    /// When `sink` is set each outcome is also sent there as soon as its task
    /// finishes.
    pub async fn run(
        &self,
        tasks: Vec<FetchTask>,
        sink: Option<mpsc::Sender<TaskOutcome>>,
    ) -> Vec<TaskOutcome> {
        let total = tasks.len();
        let gate = Semaphore::new(self.max_concurrent);
        let started = Instant::now();

        let mut in_flight: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|task| self.run_task(&gate, task))
            .collect();

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = in_flight.next().await {
            if let Some(tx) = &sink {
                forward(tx, outcome.clone());
            }
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| o.failed).count();
        info!(
            tasks = total,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Orchestration complete: {}/{} tasks succeeded",
            total - failed,
            total,
        );
        outcomes
    }

    async fn run_task(&self, gate: &Semaphore, task: FetchTask) -> TaskOutcome {
        let key = task.key();
        // The gate is owned by `run` and never closed while tasks are pending.
        let Ok(_permit) = gate.acquire().await else {
            return TaskOutcome { key, records: Vec::new(), failed: true };
        };

        let wait = self.politeness.reserve(&self.adapter.host(&task));
        if !wait.is_zero() {
            debug!(key = %key, wait_ms = wait.as_millis() as u64, "Waiting for host slot");
            sleep(wait).await;
        }

        let started = Instant::now();
        debug!(key = %key, "[START] fetch");
        let result = self.fetch_bounded(&task).await;
        let elapsed = started.elapsed();
        self.latency.observe(key.sport, elapsed);

        let (records, failed) = match result {
            Ok(SiteBatch::Records(records)) => (records, false),
            Ok(SiteBatch::Fragments { fragments, link }) => {
                (expand_fragments(&fragments, &self.durations, &link), false)
            }
            Err(e) => {
                warn!(
                    sport = %key.sport,
                    venue = %key.venue,
                    date = %key.date,
                    error = %e,
                    "Fetch failed, treating as empty"
                );
                (Vec::new(), true)
            }
        };
        self.health.record_task(failed);
        info!(
            key = %key,
            records = records.len(),
            failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "[DONE] fetch"
        );

        let cool_down = self.politeness.after_task();
        if !cool_down.is_zero() {
            sleep(cool_down).await;
        }

        TaskOutcome { key, records, failed }
    }

    /// One adapter call under the per-fetch timeout.
    async fn fetch_bounded(&self, task: &FetchTask) -> Result<SiteBatch, FetchError> {
        match timeout(self.fetch_timeout, self.adapter.fetch(task)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout.as_millis() as u64)),
        }
    }
}

/// Hands an outcome to the sink without stalling the drive loop. When the
/// sink is full the send finishes on its own task.
fn forward(sink: &mpsc::Sender<TaskOutcome>, outcome: TaskOutcome) {
    match sink.try_send(outcome) {
        Ok(()) => {}
        Err(TrySendError::Full(outcome)) => {
            let sink = sink.clone();
            tokio::spawn(async move {
                let key = outcome.key.clone();
                if sink.send(outcome).await.is_err() {
                    warn!(key = %key, "Outcome sink closed");
                }
            });
        }
        Err(TrySendError::Closed(outcome)) => {
            warn!(key = %outcome.key, "Outcome sink closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AvailabilityRecord, RawSlotFragment, SiteParams, Slot, Sport, DATE_FMT};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Adapter that simulates work, tracks concurrency and fails on demand.
    #[derive(Default)]
    struct FakeSite {
        delay: Duration,
        fail_on: HashSet<NaiveDate>,
        hang_on: HashSet<NaiveDate>,
        fragments: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
        starts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl SiteAdapter for FakeSite {
        fn host(&self, _task: &FetchTask) -> String {
            "fake.example".to_string()
        }

        async fn fetch(&self, task: &FetchTask) -> Result<SiteBatch, FetchError> {
            self.starts.lock().unwrap().push(Instant::now());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if self.hang_on.contains(&task.date) {
                sleep(Duration::from_secs(60)).await;
            }
            sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.contains(&task.date) {
                return Err(FetchError::Status(500));
            }
            if self.fragments {
                return Ok(SiteBatch::Fragments {
                    fragments: vec![RawSlotFragment {
                        venue: task.venue.clone(),
                        date: task.date,
                        court: Some("Court 1".to_string()),
                        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                        end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    }],
                    link: "https://fake.example/".to_string(),
                });
            }
            Ok(SiteBatch::Records(vec![AvailabilityRecord {
                venue: task.venue.clone(),
                date: task.date.format(DATE_FMT).to_string(),
                time: "09:00 AM".to_string(),
                link: "https://fake.example/book".to_string(),
                slot: Slot::Tennis { court: "1".to_string() },
            }]))
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, d).unwrap()
    }

    fn task(venue: &str, date: NaiveDate) -> FetchTask {
        FetchTask {
            sport: Sport::Tennis,
            venue: venue.to_string(),
            date,
            params: SiteParams::TennisVenues { slug: venue.to_string() },
        }
    }

    fn orchestrator(site: Arc<FakeSite>, cfg: &Config) -> Orchestrator {
        Orchestrator::new(
            site,
            cfg,
            Arc::new(PolitenessPolicy::from_config(cfg)),
            Arc::new(FetchLatency::new()),
            Arc::new(HealthState::new()),
        )
    }

    fn quick_config(max_concurrent: usize) -> Config {
        Config {
            max_concurrent,
            politeness_delay: Duration::ZERO,
            fetch_timeout: Duration::from_secs(5),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn never_exceeds_admission_gate() {
        let site = Arc::new(FakeSite { delay: Duration::from_millis(30), ..Default::default() });
        let orch = orchestrator(site.clone(), &quick_config(2));

        let tasks = (1..=5).map(|d| task("VenueA", day(d))).collect();
        let outcomes = orch.run(tasks, None).await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(site.peak.load(Ordering::SeqCst), 2);
        assert!(outcomes.iter().all(|o| !o.failed && o.records.len() == 1));
    }

    #[tokio::test]
    async fn failure_is_isolated_to_its_key() {
        let site = Arc::new(FakeSite {
            fail_on: HashSet::from([day(1)]),
            ..Default::default()
        });
        let health = Arc::new(HealthState::new());
        let cfg = quick_config(2);
        let orch = Orchestrator::new(
            site,
            &cfg,
            Arc::new(PolitenessPolicy::from_config(&cfg)),
            Arc::new(FetchLatency::new()),
            health.clone(),
        );

        let outcomes = orch.run(vec![task("VenueA", day(1)), task("VenueA", day(2))], None).await;

        let failed = outcomes.iter().find(|o| o.key.date == day(1)).unwrap();
        assert!(failed.failed && failed.records.is_empty());
        let ok = outcomes.iter().find(|o| o.key.date == day(2)).unwrap();
        assert!(!ok.failed);
        assert_eq!(ok.records[0].date, "20250502");

        let snap = health.snapshot();
        assert_eq!((snap.tasks_ok, snap.tasks_failed), (1, 1));
    }

    #[tokio::test]
    async fn stuck_fetch_times_out_without_blocking_siblings() {
        let site = Arc::new(FakeSite {
            hang_on: HashSet::from([day(1)]),
            ..Default::default()
        });
        let cfg = Config { fetch_timeout: Duration::from_millis(50), ..quick_config(2) };
        let orch = orchestrator(site, &cfg);

        let outcomes = orch.run(vec![task("VenueA", day(1)), task("VenueA", day(2))], None).await;
        assert_eq!(outcomes.len(), 2);
        let stuck = outcomes.iter().find(|o| o.key.date == day(1)).unwrap();
        assert!(stuck.failed && stuck.records.is_empty());
        assert_eq!(outcomes.iter().filter(|o| o.failed).count(), 1);
    }

    #[tokio::test]
    async fn elapsed_timeout_is_a_fetch_error() {
        let site = Arc::new(FakeSite {
            hang_on: HashSet::from([day(1)]),
            ..Default::default()
        });
        let cfg = Config { fetch_timeout: Duration::from_millis(50), ..quick_config(1) };
        let orch = orchestrator(site, &cfg);

        let err = orch.fetch_bounded(&task("VenueA", day(1))).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(50)));
        assert_eq!(err.to_string(), "request timed out after 50 ms");
    }

    #[tokio::test]
    async fn fragments_are_expanded_inside_the_task() {
        let site = Arc::new(FakeSite { fragments: true, ..Default::default() });
        let orch = orchestrator(site, &quick_config(1));

        let outcomes = orch.run(vec![task("Pittwater RSL", day(28))], None).await;
        let records = &outcomes[0].records;
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.link == "https://fake.example/"));
    }

    #[tokio::test]
    async fn cool_down_holds_the_slot() {
        let site = Arc::new(FakeSite::default());
        let cfg = Config { politeness_delay: Duration::from_millis(60), ..quick_config(1) };
        let orch = orchestrator(site.clone(), &cfg);

        orch.run(vec![task("A", day(1)), task("A", day(2))], None).await;

        let starts = site.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn sink_receives_every_outcome() {
        let site = Arc::new(FakeSite { fail_on: HashSet::from([day(3)]), ..Default::default() });
        let orch = orchestrator(site, &quick_config(3));
        let (tx, mut rx) = mpsc::channel(16);

        let tasks = (1..=4).map(|d| task("A", day(d))).collect();
        orch.run(tasks, Some(tx)).await;

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test]
    async fn full_sink_does_not_stall_the_run() {
        let site = Arc::new(FakeSite::default());
        let orch = orchestrator(site, &quick_config(4));
        let (tx, mut rx) = mpsc::channel(1);

        // Nothing reads until the run has returned.
        let tasks = (1..=4).map(|d| task("A", day(d))).collect();
        let outcomes = timeout(Duration::from_secs(2), orch.run(tasks, Some(tx)))
            .await
            .expect("run finished with a full sink");
        assert_eq!(outcomes.len(), 4);

        let mut days = Vec::new();
        while let Some(outcome) = rx.recv().await {
            days.push(outcome.key.date);
        }
        days.sort();
        assert_eq!(days, (1..=4).map(day).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn host_reservations_are_spaced() {
        let policy = PolitenessPolicy::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.reserve("a.example"), Duration::ZERO);
        let second = policy.reserve("a.example");
        assert!(second > Duration::from_millis(900) && second <= Duration::from_secs(1));
        let third = policy.reserve("a.example");
        assert!(third > Duration::from_millis(1900));
        assert_eq!(policy.reserve("b.example"), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let policy = PolitenessPolicy::new(Duration::ZERO, Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(policy.reserve("a.example"), Duration::ZERO);
        }
    }
}
