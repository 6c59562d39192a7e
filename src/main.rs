//! edgeprobe - edge endpoint probing and ranking service.
//!
//! Measures candidate endpoints over TCP, TLS or HTTP, ranks them by latency
//! and loss, and serves the results over a small JSON API.

mod config;
mod db;
mod engine;
mod parser;
mod probe;
mod web;

use config::ServerConfig;
use db::Store;
use engine::Orchestrator;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("edgeprobe=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting edgeprobe on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let seeded = store.seed_default_candidates()?;
    if seeded > 0 {
        tracing::info!("Seeded {} default candidates", seeded);
    }

    // Build engines
    let speed = Orchestrator::from_settings(&cfg.speed)?
        .with_policy(cfg.speed_policy)
        .with_span(tracing::info_span!("speedtest"));
    let compare = Orchestrator::from_settings(&cfg.compare)?
        .with_port_fallback(false)
        .with_span(tracing::info_span!("compare"));
    tracing::info!(
        "Speed test: {:?} probe, {} attempts, {:?} timeout, {} workers, {:?} ranking",
        cfg.speed.kind,
        cfg.speed.attempts,
        cfg.speed.timeout,
        speed.pool().capacity(),
        cfg.speed_policy
    );
    tracing::info!(
        "Comparison: {:?} probe, {} attempts, {:?} timeout, {} workers",
        cfg.compare.kind,
        cfg.compare.attempts,
        cfg.compare.timeout,
        compare.pool().capacity()
    );

    // Start web server
    let server = Server::new(cfg, store, Arc::new(speed), Arc::new(compare));
    server.start().await?;

    Ok(())
}
