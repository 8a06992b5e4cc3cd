//! Visitrack - a lightweight page-visit tracker
//!
//! Records hits for tracked pages and turns them into:
//! - Deduplicated per-page visit counts (one count per visitor per page)
//! - Browsing sessions grouped by a sliding activity window
//! - Aggregate reports (weekday trends, top pages, domain shares)

mod config;
mod db;
mod error;
mod events;
mod pages;
mod recorder;
mod sessions;
mod stats;
mod visitors;
mod web;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    // Initialize logging based on LOG_FORMAT env var
    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::INFO)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .init();
    }

    info!("Starting Visitrack...");

    // Load configuration
    let config = config::Config::load()?;
    info!("Configuration loaded");

    // Initialize database
    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;
    info!("Database initialized");

    // Create event bus for broadcasting recorded visits
    let (event_tx, _) = tokio::sync::broadcast::channel(1000);
    let event_bus = events::EventBus::new(event_tx);

    // Start web server (blocking)
    web::start_server(&config, event_bus, db).await?;

    Ok(())
}
