//! Statsboard server entry point

use anyhow::Result;
use statsboard::{config, dashboard, events, fetchers, playstore, store, web};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let config = config::Config::load()?;

    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Statsboard...");
    info!(
        store = %config.store.path.display(),
        package = %config.cron.package_name,
        baseline = config.dashboard.subscription_baseline,
        "Configuration loaded"
    );

    let client = reqwest::Client::builder().build()?;
    let store = store::StatsStore::new(&config.store.path);
    let fetchers = fetchers::StatFetchers::new(client.clone(), &config, store.clone());
    let scraper = playstore::PlayStoreScraper::new(client, &config.upstream);

    // Create event bus for broadcasting dashboard snapshots
    let event_bus = events::EventBus::with_capacity(64);
    let dashboard = dashboard::Dashboard::new(event_bus.clone());

    // Start the polling tiers in background; dropping the handle stops them
    let _poller = dashboard::Poller::start(dashboard.clone(), fetchers.clone(), &config.dashboard);

    let state = Arc::new(web::AppState {
        store,
        fetchers,
        scraper,
        dashboard,
        event_bus,
        cron: config.cron.clone(),
    });

    // Start web server (blocking)
    web::start_server(&config, state).await?;

    Ok(())
}
