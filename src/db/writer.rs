use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnection, SqliteQueryResult};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::error::{AppError, Result};
use crate::types::{AvailabilityRecord, FetchTask, Slot, Sport, TaskKey, TaskOutcome, DATE_FMT};

/// Counts from one `replace_partitions` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Distinct (venue, fecha) pairs that were replaced.
    pub partitions: u64,
    pub inserted: u64,
    /// Rows dropped by the UNIQUE constraint.
    pub ignored: u64,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.partitions += other.partitions;
        self.inserted += other.inserted;
        self.ignored += other.ignored;
    }
}

/// Sole owner of writes to the availability tables.
#[derive(Clone)]
pub struct PartitionWriter {
    pool: sqlx::SqlitePool,
}

impl PartitionWriter {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Fails with `AppError::Config` naming the first sport table that is absent.
    pub async fn ensure_tables(&self) -> Result<()> {
        for sport in Sport::ALL {
            let found: Option<(String,)> =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(sport.table())
                    .fetch_optional(&self.pool)
                    .await?;
            if found.is_none() {
                return Err(AppError::Config(format!(
                    "table `{}` for {sport} is missing; run the migrations",
                    sport.table()
                )));
            }
        }
        Ok(())
    }

    /// Replace every (venue, fecha) partition present in `records` with exactly
    /// those records, in one transaction.
    ///
    /// An empty batch leaves the store untouched. Records belonging to another
    /// sport are skipped.
    pub async fn replace_partitions(
        &self,
        sport: Sport,
        records: &[AvailabilityRecord],
    ) -> Result<WriteSummary> {
        let batch: Vec<&AvailabilityRecord> = records
            .iter()
            .filter(|r| {
                let matches = r.sport() == sport;
                if !matches {
                    warn!(
                        sport = %sport,
                        record_sport = %r.sport(),
                        venue = %r.venue,
                        "Skipping record for another sport"
                    );
                }
                matches
            })
            .collect();

        if batch.is_empty() {
            debug!(sport = %sport, "Empty batch, keeping stored partitions");
            return Ok(WriteSummary::default());
        }

        let partitions: BTreeSet<(&str, &str)> = batch.iter().map(|r| r.partition()).collect();
        let delete_sql = format!("DELETE FROM {} WHERE venue = ? AND fecha = ?", sport.table());

        let mut tx = self.pool.begin().await?;
        for (venue, fecha) in &partitions {
            sqlx::query(&delete_sql)
                .bind(*venue)
                .bind(*fecha)
                .execute(&mut *tx)
                .await?;
        }
        let mut inserted = 0;
        for record in &batch {
            inserted += insert_record(&mut *tx, record).await?.rows_affected();
        }
        tx.commit().await?;

        let summary = WriteSummary {
            partitions: partitions.len() as u64,
            inserted,
            ignored: batch.len() as u64 - inserted,
        };
        info!(
            sport = %sport,
            partitions = summary.partitions,
            inserted = summary.inserted,
            ignored = summary.ignored,
            "Partitions replaced"
        );
        Ok(summary)
    }

    /// Delete rows dated before `today` from every sport table.
    pub async fn purge_expired(&self, today: NaiveDate) -> Result<u64> {
        let cutoff = today.format(DATE_FMT).to_string();
        let mut purged = 0;
        for sport in Sport::ALL {
            let done = sqlx::query(&format!("DELETE FROM {} WHERE fecha < ?", sport.table()))
                .bind(&cutoff)
                .execute(&self.pool)
                .await?;
            purged += done.rows_affected();
        }
        if purged > 0 {
            info!(cutoff = %cutoff, purged, "Expired availability purged");
        }
        Ok(purged)
    }
}

async fn insert_record(
    conn: &mut SqliteConnection,
    r: &AvailabilityRecord,
) -> std::result::Result<SqliteQueryResult, sqlx::Error> {
    match &r.slot {
        Slot::Tennis { court } => {
            sqlx::query(
                "INSERT OR IGNORE INTO horarios (venue, fecha, cancha, hora, link) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&r.venue)
            .bind(&r.date)
            .bind(court)
            .bind(&r.time)
            .bind(&r.link)
            .execute(conn)
            .await
        }
        Slot::Golf { holes, spots } => {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO golf_horarios (venue, fecha, hora, hoyos, lugares, link)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.venue)
            .bind(&r.date)
            .bind(&r.time)
            .bind(*holes)
            .bind(*spots)
            .bind(&r.link)
            .execute(conn)
            .await
        }
        Slot::Futsal { minutes, court } => {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO futsal_horarios (venue, fecha, hora, minutos, court, link)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&r.venue)
            .bind(&r.date)
            .bind(&r.time)
            .bind(*minutes)
            .bind(court)
            .bind(&r.link)
            .execute(conn)
            .await
        }
    }
}

// ---------------------------------------------------------------------------
// PartitionGate
// ---------------------------------------------------------------------------

/// Holds task outcomes until every task sharing a (sport, venue, date) key
/// has reported, so sibling fetches of one partition (golf fee groups,
/// futsal appointment types) land in a single replacement.
#[derive(Debug, Default)]
pub struct PartitionGate {
    pending: HashMap<TaskKey, Pending>,
}

#[derive(Debug, Default)]
struct Pending {
    remaining: usize,
    failed: bool,
    records: Vec<AvailabilityRecord>,
}

impl PartitionGate {
    pub fn new(tasks: &[FetchTask]) -> Self {
        let mut pending: HashMap<TaskKey, Pending> = HashMap::new();
        for task in tasks {
            pending.entry(task.key()).or_default().remaining += 1;
        }
        Self { pending }
    }

    /// Returns the merged records of a key once its last task has reported.
    ///
    /// A key with any failed task yields nothing: replacing it with the
    /// surviving siblings alone would drop the failed task's stored rows.
    pub fn offer(&mut self, outcome: TaskOutcome) -> Option<(TaskKey, Vec<AvailabilityRecord>)> {
        let TaskOutcome { key, records, failed } = outcome;
        let entry = self.pending.entry(key.clone()).or_insert_with(|| Pending {
            remaining: 1,
            ..Default::default()
        });
        entry.failed |= failed;
        entry.records.extend(records);
        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining > 0 {
            return None;
        }

        let done = self.pending.remove(&key)?;
        if done.failed {
            warn!(key = %key, "Partition had a failed fetch, keeping stored rows");
            return None;
        }
        Some((key, done.records))
    }

    /// Keys still waiting on at least one task.
    pub fn open(&self) -> usize {
        self.pending.len()
    }
}

/// Receives task outcomes from the orchestrator and persists each partition
/// as soon as it is complete. Runs as a dedicated background task in
/// per-task write mode.
pub struct DbWriter {
    writer: PartitionWriter,
    outcome_rx: mpsc::Receiver<TaskOutcome>,
    gate: PartitionGate,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(
        writer: PartitionWriter,
        outcome_rx: mpsc::Receiver<TaskOutcome>,
        gate: PartitionGate,
        health: Arc<HealthState>,
    ) -> Self {
        Self { writer, outcome_rx, gate, health }
    }

    /// Drains the channel until every sender is dropped.
    pub async fn run(mut self) -> WriteSummary {
        let mut total = WriteSummary::default();
        while let Some(outcome) = self.outcome_rx.recv().await {
            let Some((key, records)) = self.gate.offer(outcome) else {
                continue;
            };
            match self.writer.replace_partitions(key.sport, &records).await {
                Ok(summary) => {
                    self.health.add_rows_written(summary.inserted);
                    total.merge(summary);
                }
                Err(e) => error!(key = %key, "DB write error: {e}"),
            }
        }
        if self.gate.open() > 0 {
            warn!(open = self.gate.open(), "Outcome channel closed with partitions still pending");
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::types::SiteParams;

    fn tennis(venue: &str, date: &str, court: &str, time: &str, link: &str) -> AvailabilityRecord {
        AvailabilityRecord {
            venue: venue.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            link: link.to_string(),
            slot: Slot::Tennis { court: court.to_string() },
        }
    }

    async fn tennis_rows(pool: &sqlx::SqlitePool) -> Vec<(String, String, String, String, String)> {
        sqlx::query_as("SELECT venue, fecha, cancha, hora, link FROM horarios ORDER BY venue, fecha, cancha, hora")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ensure_tables_passes_after_migration() {
        let writer = PartitionWriter::new(memory_pool().await);
        writer.ensure_tables().await.unwrap();
    }

    #[tokio::test]
    async fn ensure_tables_reports_missing_table() {
        let pool = memory_pool().await;
        sqlx::query("DROP TABLE golf_horarios").execute(&pool).await.unwrap();
        let err = PartitionWriter::new(pool).ensure_tables().await.unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("golf_horarios")));
    }

    #[tokio::test]
    async fn replace_leaves_exactly_the_new_batch() {
        let pool = memory_pool().await;
        let writer = PartitionWriter::new(pool.clone());
        writer
            .replace_partitions(
                Sport::Tennis,
                &[
                    tennis("A", "20250528", "1", "07:00 AM", "l"),
                    tennis("A", "20250528", "2", "08:00 AM", "l"),
                ],
            )
            .await
            .unwrap();

        let summary = writer
            .replace_partitions(Sport::Tennis, &[tennis("A", "20250528", "3", "09:00 AM", "l")])
            .await
            .unwrap();

        assert_eq!(summary, WriteSummary { partitions: 1, inserted: 1, ignored: 0 });
        let rows = tennis_rows(&pool).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2, "3");
    }

    #[tokio::test]
    async fn other_partitions_are_untouched() {
        let pool = memory_pool().await;
        let writer = PartitionWriter::new(pool.clone());
        writer
            .replace_partitions(
                Sport::Tennis,
                &[
                    tennis("A", "20250528", "1", "07:00 AM", "l"),
                    tennis("A", "20250529", "1", "07:00 AM", "l"),
                    tennis("B", "20250528", "1", "07:00 AM", "l"),
                ],
            )
            .await
            .unwrap();

        // Only (A, 28) and (B, 29) are replaced; (A, 29) and (B, 28) stay.
        let summary = writer
            .replace_partitions(
                Sport::Tennis,
                &[
                    tennis("A", "20250528", "9", "10:00 AM", "l"),
                    tennis("B", "20250529", "9", "10:00 AM", "l"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(summary.partitions, 2);

        let rows = tennis_rows(&pool).await;
        let keys: Vec<(&str, &str, &str)> =
            rows.iter().map(|r| (r.0.as_str(), r.1.as_str(), r.2.as_str())).collect();
        assert_eq!(
            keys,
            vec![
                ("A", "20250528", "9"),
                ("A", "20250529", "1"),
                ("B", "20250528", "1"),
                ("B", "20250529", "9"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let pool = memory_pool().await;
        let writer = PartitionWriter::new(pool.clone());
        writer
            .replace_partitions(Sport::Tennis, &[tennis("A", "20250528", "1", "07:00 AM", "l")])
            .await
            .unwrap();

        let summary = writer.replace_partitions(Sport::Tennis, &[]).await.unwrap();
        assert_eq!(summary, WriteSummary::default());
        assert_eq!(tennis_rows(&pool).await.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_link_keeps_the_first_row() {
        let pool = memory_pool().await;
        let writer = PartitionWriter::new(pool.clone());
        let summary = writer
            .replace_partitions(
                Sport::Tennis,
                &[
                    tennis("A", "20250528", "1", "07:00 AM", "first"),
                    tennis("A", "20250528", "1", "07:00 AM", "second"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(summary, WriteSummary { partitions: 1, inserted: 1, ignored: 1 });
        let rows = tennis_rows(&pool).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].4, "first");
    }

    #[tokio::test]
    async fn records_of_another_sport_are_skipped() {
        let pool = memory_pool().await;
        let writer = PartitionWriter::new(pool.clone());
        let golf = AvailabilityRecord {
            venue: "Moore Park".to_string(),
            date: "20250528".to_string(),
            time: "07:10 AM".to_string(),
            link: "l".to_string(),
            slot: Slot::Golf { holes: 18, spots: 4 },
        };
        let summary = writer.replace_partitions(Sport::Tennis, &[golf]).await.unwrap();
        assert_eq!(summary, WriteSummary::default());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM golf_horarios")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn golf_and_futsal_rows_are_stored() {
        let pool = memory_pool().await;
        let writer = PartitionWriter::new(pool.clone());
        writer
            .replace_partitions(
                Sport::Golf,
                &[AvailabilityRecord {
                    venue: "Moore Park".to_string(),
                    date: "20250528".to_string(),
                    time: "07:10 AM".to_string(),
                    link: "g".to_string(),
                    slot: Slot::Golf { holes: 9, spots: 3 },
                }],
            )
            .await
            .unwrap();
        writer
            .replace_partitions(
                Sport::Futsal,
                &[AvailabilityRecord {
                    venue: "Pittwater RSL".to_string(),
                    date: "20250528".to_string(),
                    time: "09:00 AM".to_string(),
                    link: "f".to_string(),
                    slot: Slot::Futsal { minutes: 60, court: "Court 1".to_string() },
                }],
            )
            .await
            .unwrap();

        let golf: (i64, i64) = sqlx::query_as("SELECT hoyos, lugares FROM golf_horarios")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(golf, (9, 3));
        let futsal: (i64, String) = sqlx::query_as("SELECT minutos, court FROM futsal_horarios")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(futsal, (60, "Court 1".to_string()));
    }

    #[tokio::test]
    async fn purge_removes_only_past_dates() {
        let pool = memory_pool().await;
        let writer = PartitionWriter::new(pool.clone());
        let today = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let yesterday = today.pred_opt().unwrap().format(DATE_FMT).to_string();
        writer
            .replace_partitions(
                Sport::Tennis,
                &[
                    tennis("A", &yesterday, "1", "07:00 AM", "l"),
                    tennis("A", "20250528", "1", "07:00 AM", "l"),
                    tennis("A", "20250601", "1", "07:00 AM", "l"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(writer.purge_expired(today).await.unwrap(), 1);
        let rows = tennis_rows(&pool).await;
        assert!(rows.iter().all(|r| r.1.as_str() >= "20250528"));
        assert_eq!(rows.len(), 2);
    }

    fn golf_task(date: NaiveDate, holes: i64) -> FetchTask {
        FetchTask {
            sport: Sport::Golf,
            venue: "Moore Park".to_string(),
            date,
            params: SiteParams::MiClub {
                domain: "moorepark.example".to_string(),
                booking_resource_id: "3000000".to_string(),
                fee_group_id: holes.to_string(),
                holes,
            },
        }
    }

    fn tee_time(date: NaiveDate, holes: i64) -> AvailabilityRecord {
        AvailabilityRecord {
            venue: "Moore Park".to_string(),
            date: date.format(DATE_FMT).to_string(),
            time: "07:00 AM".to_string(),
            link: "l".to_string(),
            slot: Slot::Golf { holes, spots: 4 },
        }
    }

    fn outcome(task: &FetchTask, records: Vec<AvailabilityRecord>, failed: bool) -> TaskOutcome {
        TaskOutcome { key: task.key(), records, failed }
    }

    #[test]
    fn gate_releases_a_partition_after_its_last_task() {
        let day = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let (nine, eighteen) = (golf_task(day, 9), golf_task(day, 18));
        let mut gate = PartitionGate::new(&[nine.clone(), eighteen.clone()]);

        assert!(gate.offer(outcome(&nine, vec![tee_time(day, 9)], false)).is_none());
        let (key, records) = gate.offer(outcome(&eighteen, vec![tee_time(day, 18)], false)).unwrap();
        assert_eq!(key, nine.key());
        assert_eq!(records.len(), 2);
        assert_eq!(gate.open(), 0);
    }

    #[test]
    fn gate_withholds_a_partition_with_a_failed_sibling() {
        let day = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let (nine, eighteen) = (golf_task(day, 9), golf_task(day, 18));
        let mut gate = PartitionGate::new(&[nine.clone(), eighteen.clone()]);

        assert!(gate.offer(outcome(&nine, vec![], true)).is_none());
        assert!(gate.offer(outcome(&eighteen, vec![tee_time(day, 18)], false)).is_none());
        assert_eq!(gate.open(), 0);
    }

    #[tokio::test]
    async fn background_writer_keeps_sibling_rows_together() {
        let pool = memory_pool().await;
        let health = Arc::new(HealthState::new());
        let day = NaiveDate::from_ymd_opt(2025, 5, 28).unwrap();
        let tasks = vec![golf_task(day, 9), golf_task(day, 18)];

        let (tx, rx) = mpsc::channel(8);
        let gate = PartitionGate::new(&tasks);
        let db_writer = DbWriter::new(PartitionWriter::new(pool.clone()), rx, gate, health.clone());
        let handle = tokio::spawn(db_writer.run());

        tx.send(outcome(&tasks[0], vec![tee_time(day, 9)], false)).await.unwrap();
        tx.send(outcome(&tasks[1], vec![tee_time(day, 18)], false)).await.unwrap();
        drop(tx);

        let total = handle.await.unwrap();
        assert_eq!(total, WriteSummary { partitions: 1, inserted: 2, ignored: 0 });
        assert_eq!(health.snapshot().rows_written, 2);

        let holes: Vec<(i64,)> = sqlx::query_as("SELECT hoyos FROM golf_horarios ORDER BY hoyos")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(holes, vec![(9,), (18,)]);
    }
}
