mod adapters;
mod api;
mod config;
mod db;
mod error;
mod expander;
mod ingest;
mod normalize;
mod orchestrator;
mod registry;
mod types;

use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::adapters::AdapterSet;
use crate::api::health::HealthState;
use crate::api::latency::FetchLatency;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::PartitionWriter;
use crate::error::Result;
use crate::ingest::{Context, Ingestor};
use crate::orchestrator::{Orchestrator, PolitenessPolicy};
use crate::registry::VenueRegistry;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.db_path))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let writer = PartitionWriter::new(pool.clone());
    writer.ensure_tables().await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Venue registry ---
    let registry = VenueRegistry::load(&cfg.venues_path)?;
    info!(
        "Loaded {} venues from {} (tennis={}, golf={}, futsal={})",
        registry.venue_count(),
        cfg.venues_path,
        registry.tennis.len(),
        registry.golf.len(),
        registry.futsal.len(),
    );

    // --- Shared instrumentation ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(FetchLatency::new());

    // --- Ingestion (background) ---
    let orchestrator = Orchestrator::new(
        Arc::new(AdapterSet::http(&cfg)?),
        &cfg,
        Arc::new(PolitenessPolicy::from_config(&cfg)),
        Arc::clone(&latency),
        Arc::clone(&health),
    );
    let ingestor = Ingestor::new(Context {
        cfg: cfg.clone(),
        registry,
        orchestrator,
        writer,
        health: Arc::clone(&health),
    });
    tokio::spawn(async move { ingestor.run().await });

    // HTTP API server
    let api_state = ApiState { pool, health, latency };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
