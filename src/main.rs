//! Profile analytics server
//!
//! Serves the visit, click and save triggers for public profiles plus the
//! owner dashboard API.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use profile_analytics::config::Config;
use profile_analytics::web::{self, AppState};
use profile_analytics::{db, geocoder, geoip};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting profile analytics...");

    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;
    info!("Database initialized");

    let geocoder = geocoder::from_config(&config.geocoding);
    let geolocator = geoip::from_config(&config.geoip);
    info!("Location providers: {} / {}", geocoder.name(), geolocator.name());

    let (write_tx, write_handle) = db::start_write_buffer(Arc::new(db.clone()));

    let state = Arc::new(AppState::new(config, db, geocoder, geolocator, write_tx));
    web::start_server(state).await?;

    // Server and state are gone, so every sender is dropped; wait for the last flush
    if let Err(e) = write_handle.await {
        tracing::error!("Write buffer task failed: {}", e);
    }

    Ok(())
}
