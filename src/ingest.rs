//! One ingestion cycle: purge expired rows, fetch every (venue, date) task,
//! write what came back. `Ingestor::run` repeats the cycle on an interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info};

use crate::api::health::HealthState;
use crate::config::{Config, WriteMode, CHANNEL_CAPACITY};
use crate::db::{DbWriter, PartitionGate, PartitionWriter, WriteSummary};
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::registry::VenueRegistry;
use crate::types::{AvailabilityRecord, Sport, TaskOutcome};

/// Everything a cycle needs, built once at startup and passed down.
pub struct Context {
    pub cfg: Config,
    pub registry: VenueRegistry,
    pub orchestrator: Orchestrator,
    pub writer: PartitionWriter,
    pub health: Arc<HealthState>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub tasks: usize,
    pub failed: usize,
    pub purged: u64,
    pub written: WriteSummary,
}

pub struct Ingestor {
    ctx: Context,
}

impl Ingestor {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Runs a cycle immediately, then every `INGEST_INTERVAL_SECS` when set.
    pub async fn run(self) {
        self.run_logged().await;

        let secs = self.ctx.cfg.ingest_interval_secs;
        if secs == 0 {
            info!("INGEST_INTERVAL_SECS=0, no further cycles scheduled");
            return;
        }
        let mut ticker = interval(Duration::from_secs(secs));
        ticker.tick().await; // skip immediate first tick, the startup cycle already ran

        loop {
            ticker.tick().await;
            self.run_logged().await;
        }
    }

    async fn run_logged(&self) {
        let today = chrono::Local::now().date_naive();
        if let Err(e) = self.run_cycle(today).await {
            error!("Ingestion cycle failed: {e}");
        }
    }

    pub async fn run_cycle(&self, today: NaiveDate) -> Result<CycleReport> {
        let health = &self.ctx.health;
        health.set_cycle_running(true);
        let result = self.cycle(today).await;
        match &result {
            Ok(_) => health.finish_cycle(now_secs()),
            Err(_) => health.set_cycle_running(false),
        }
        result
    }

    async fn cycle(&self, today: NaiveDate) -> Result<CycleReport> {
        let ctx = &self.ctx;
        let purged = ctx.writer.purge_expired(today).await?;
        ctx.health.add_rows_purged(purged);

        let tasks = ctx.registry.tasks(today, ctx.cfg.days_to_scrape)?;
        let total = tasks.len();
        info!(
            tasks = total,
            venues = ctx.registry.venue_count(),
            days = ctx.cfg.days_to_scrape,
            mode = ?ctx.cfg.write_mode,
            "Ingestion cycle starting"
        );

        let gate = PartitionGate::new(&tasks);
        let (outcomes, written) = match ctx.cfg.write_mode {
            WriteMode::Batch => {
                let outcomes = ctx.orchestrator.run(tasks, None).await;
                let written = self.write_batches(gate, &outcomes).await?;
                (outcomes, written)
            }
            WriteMode::PerTask => {
                let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
                let db_writer = DbWriter::new(ctx.writer.clone(), rx, gate, Arc::clone(&ctx.health));
                let handle = tokio::spawn(db_writer.run());
                let outcomes = ctx.orchestrator.run(tasks, Some(tx)).await;
                let written = match handle.await {
                    Ok(summary) => summary,
                    Err(e) => {
                        error!("DB writer task ended abnormally: {e}");
                        WriteSummary::default()
                    }
                };
                (outcomes, written)
            }
        };

        let report = CycleReport {
            tasks: total,
            failed: outcomes.iter().filter(|o| o.failed).count(),
            purged,
            written,
        };
        info!(
            tasks = report.tasks,
            failed = report.failed,
            purged = report.purged,
            partitions = report.written.partitions,
            inserted = report.written.inserted,
            ignored = report.written.ignored,
            "Ingestion cycle complete"
        );
        Ok(report)
    }

    /// One `replace_partitions` call per sport, over the partitions whose
    /// tasks all succeeded.
    async fn write_batches(&self, mut gate: PartitionGate, outcomes: &[TaskOutcome]) -> Result<WriteSummary> {
        let mut by_sport: HashMap<Sport, Vec<AvailabilityRecord>> = HashMap::new();
        for outcome in outcomes {
            if let Some((key, records)) = gate.offer(outcome.clone()) {
                by_sport.entry(key.sport).or_default().extend(records);
            }
        }

        let mut total = WriteSummary::default();
        for sport in Sport::ALL {
            let Some(records) = by_sport.get(&sport) else {
                continue;
            };
            let summary = self.ctx.writer.replace_partitions(sport, records).await?;
            self.ctx.health.add_rows_written(summary.inserted);
            total.merge(summary);
        }
        Ok(total)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
