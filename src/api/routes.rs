use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{FetchLatency, LatencySummary};
use crate::db::models::{FutsalRow, GolfRow, TennisRow};
use crate::db::queries::{self, Aggregate, AggregateFilter, SlotFilter};
use crate::error::AppError;
use crate::normalize::{format_time, parse_time};
use crate::types::{Sport, DATE_FMT};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub health: Arc<HealthState>,
    pub latency: Arc<FetchLatency>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(get_home))
        .route("/disponibilidad", get(get_tennis))
        .route("/disponibilidad/resumen", get(get_summary))
        .route("/golf", get(get_golf))
        .route("/futsal", get(get_futsal))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TennisQuery {
    pub venue: String,
    pub fecha: String,
    pub hora: Option<String>,
    pub hora_redondeada: Option<String>,
}

#[derive(Deserialize)]
pub struct GolfQuery {
    pub venue: String,
    pub fecha: String,
    pub hora: Option<String>,
    pub hora_redondeada: Option<String>,
    pub hoyos: Option<i64>,
}

#[derive(Deserialize)]
pub struct FutsalQuery {
    pub venue: String,
    pub fecha: String,
    pub hora: Option<String>,
    pub hora_redondeada: Option<String>,
    pub court: Option<String>,
    pub minutos: Option<i64>,
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub deporte: Option<String>,
    pub venue: Option<String>,
    pub fecha: Option<String>,
    pub hora: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HomeResponse {
    pub ok: bool,
    pub message: &'static str,
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

fn check_fecha(raw: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if raw.len() != 8 || NaiveDate::parse_from_str(raw, DATE_FMT).is_err() {
        return Err(AppError::BadRequest(format!("fecha must be YYYYMMDD, got `{raw}`")));
    }
    Ok(raw.to_string())
}

/// Canonicalises a time filter so it compares equal to stored values.
fn check_hora(raw: Option<&str>) -> Result<Option<String>, AppError> {
    raw.map(|h| {
        parse_time(h)
            .map(format_time)
            .map_err(|e| AppError::BadRequest(e.to_string()))
    })
    .transpose()
}

fn check_deporte(raw: Option<&str>) -> Result<Option<Sport>, AppError> {
    raw.map(|d| d.parse::<Sport>().map_err(AppError::BadRequest))
        .transpose()
}

fn slot_filter(
    venue: String,
    fecha: &str,
    hora: Option<&str>,
    hora_redondeada: Option<&str>,
) -> Result<SlotFilter, AppError> {
    Ok(SlotFilter {
        venue,
        fecha: check_fecha(fecha)?,
        hora: check_hora(hora)?,
        hora_redondeada: check_hora(hora_redondeada)?,
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_home() -> Json<HomeResponse> {
    Json(HomeResponse {
        ok: true,
        message: "API de Disponibilidad",
    })
}

async fn get_tennis(
    State(state): State<ApiState>,
    Query(params): Query<TennisQuery>,
) -> Result<Json<Vec<TennisRow>>, AppError> {
    let filter = slot_filter(
        params.venue,
        &params.fecha,
        params.hora.as_deref(),
        params.hora_redondeada.as_deref(),
    )?;
    Ok(Json(queries::tennis(&state.pool, &filter).await?))
}

async fn get_golf(
    State(state): State<ApiState>,
    Query(params): Query<GolfQuery>,
) -> Result<Json<Vec<GolfRow>>, AppError> {
    let filter = slot_filter(
        params.venue,
        &params.fecha,
        params.hora.as_deref(),
        params.hora_redondeada.as_deref(),
    )?;
    Ok(Json(queries::golf(&state.pool, &filter, params.hoyos).await?))
}

async fn get_futsal(
    State(state): State<ApiState>,
    Query(params): Query<FutsalQuery>,
) -> Result<Json<Vec<FutsalRow>>, AppError> {
    let filter = slot_filter(
        params.venue,
        &params.fecha,
        params.hora.as_deref(),
        params.hora_redondeada.as_deref(),
    )?;
    let rows = queries::futsal(&state.pool, &filter, params.court.as_deref(), params.minutos).await?;
    Ok(Json(rows))
}

async fn get_summary(
    State(state): State<ApiState>,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<Aggregate>, AppError> {
    let filter = AggregateFilter {
        sport: check_deporte(params.deporte.as_deref())?,
        venue: params.venue,
        fecha: params.fecha.as_deref().map(check_fecha).transpose()?,
        hora: check_hora(params.hora.as_deref())?,
    };
    Ok(Json(queries::aggregate(&state.pool, &filter).await?))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}
