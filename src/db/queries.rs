//! Read-only availability lookups behind the HTTP API.
//!
//! Times are stored canonical (`hh:mm AM/PM`). Exact `hora` filters run in
//! SQL; half-hour matching rounds stored values on read.

use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{FutsalRow, GolfRow, SlotTimeRow, TennisRow};
use crate::error::{AppError, Result};
use crate::normalize::{normalize, round_to_half_hour};
use crate::types::Sport;

/// Filters shared by every per-sport lookup. Times must already be canonical.
#[derive(Debug, Clone, Default)]
pub struct SlotFilter {
    pub venue: String,
    pub fecha: String,
    /// Exact start time.
    pub hora: Option<String>,
    /// Start time compared after both sides are rounded to the half hour.
    pub hora_redondeada: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateFilter {
    pub sport: Option<Sport>,
    pub venue: Option<String>,
    pub fecha: Option<String>,
    pub hora: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub status: bool,
    pub venues_count: usize,
    /// Distinct, lexicographically sorted.
    pub venues: Vec<String>,
}

pub async fn tennis(pool: &SqlitePool, f: &SlotFilter) -> Result<Vec<TennisRow>> {
    let table = Sport::Tennis.table();
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT venue, fecha, cancha, hora, link FROM {table} WHERE "
    ));
    push_partition(&mut qb, f);
    qb.push(" ORDER BY id");

    let rows: Vec<TennisRow> = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::from_query(e, table))?;
    Ok(keep_rounded(rows, f, |r| &r.hora))
}

pub async fn golf(pool: &SqlitePool, f: &SlotFilter, hoyos: Option<i64>) -> Result<Vec<GolfRow>> {
    let table = Sport::Golf.table();
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT venue, fecha, hora, hoyos, lugares, link FROM {table} WHERE "
    ));
    push_partition(&mut qb, f);
    if let Some(hoyos) = hoyos {
        qb.push(" AND hoyos = ").push_bind(hoyos);
    }
    qb.push(" ORDER BY id");

    let rows: Vec<GolfRow> = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::from_query(e, table))?;
    Ok(keep_rounded(rows, f, |r| &r.hora))
}

pub async fn futsal(
    pool: &SqlitePool,
    f: &SlotFilter,
    court: Option<&str>,
    minutos: Option<i64>,
) -> Result<Vec<FutsalRow>> {
    let table = Sport::Futsal.table();
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT venue, fecha, hora, minutos, court, link FROM {table} WHERE "
    ));
    push_partition(&mut qb, f);
    if let Some(court) = court {
        qb.push(" AND court = ").push_bind(court.to_string());
    }
    if let Some(minutos) = minutos {
        qb.push(" AND minutos = ").push_bind(minutos);
    }
    qb.push(" ORDER BY id");

    let rows: Vec<FutsalRow> = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::from_query(e, table))?;
    Ok(keep_rounded(rows, f, |r| &r.hora))
}

/// Which venues have anything matching, across one sport or all of them.
pub async fn aggregate(pool: &SqlitePool, f: &AggregateFilter) -> Result<Aggregate> {
    let sports: Vec<Sport> = match f.sport {
        Some(sport) => vec![sport],
        None => Sport::ALL.to_vec(),
    };
    let target = f.hora.as_deref().map(round_to_half_hour);

    let mut venues = BTreeSet::new();
    for sport in sports {
        let table = sport.table();
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT venue, hora FROM {table} WHERE 1 = 1"));
        if let Some(venue) = &f.venue {
            qb.push(" AND venue = ").push_bind(venue.clone());
        }
        if let Some(fecha) = &f.fecha {
            qb.push(" AND fecha = ").push_bind(fecha.clone());
        }
        let rows: Vec<SlotTimeRow> = qb
            .build_query_as()
            .fetch_all(pool)
            .await
            .map_err(|e| AppError::from_query(e, table))?;

        for row in rows {
            let hit = target
                .as_deref()
                .map_or(true, |t| round_to_half_hour(&normalize(&row.hora)) == t);
            if hit {
                venues.insert(row.venue);
            }
        }
    }

    let venues: Vec<String> = venues.into_iter().collect();
    Ok(Aggregate {
        status: !venues.is_empty(),
        venues_count: venues.len(),
        venues,
    })
}

fn push_partition(qb: &mut QueryBuilder<'_, Sqlite>, f: &SlotFilter) {
    qb.push("venue = ").push_bind(f.venue.clone());
    qb.push(" AND fecha = ").push_bind(f.fecha.clone());
    if let Some(hora) = &f.hora {
        qb.push(" AND hora = ").push_bind(hora.clone());
    }
}

fn keep_rounded<T>(rows: Vec<T>, f: &SlotFilter, hora: impl Fn(&T) -> &String) -> Vec<T> {
    match f.hora_redondeada.as_deref() {
        None => rows,
        Some(wanted) => {
            let wanted = round_to_half_hour(wanted);
            rows.into_iter()
                .filter(|r| round_to_half_hour(&normalize(hora(r))) == wanted)
                .collect()
        }
    }
}
