//! Row types of the three availability tables (see migrations/0001_availability.sql).
//! Column names are kept as stored so the JSON the API returns matches them.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TennisRow {
    pub venue: String,
    pub fecha: String,
    pub cancha: String,
    pub hora: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct GolfRow {
    pub venue: String,
    pub fecha: String,
    pub hora: String,
    pub hoyos: i64,
    pub lugares: i64,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FutsalRow {
    pub venue: String,
    pub fecha: String,
    pub hora: String,
    pub minutos: i64,
    pub court: String,
    pub link: String,
}

/// Minimal projection used by the cross-sport aggregate.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SlotTimeRow {
    pub venue: String,
    pub hora: String,
}
