//! Web server module

mod routes;
mod sse;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::config::{Config, CronConfig};
use crate::dashboard::Dashboard;
use crate::events::EventBus;
use crate::fetchers::StatFetchers;
use crate::playstore::PlayStoreScraper;
use crate::store::StatsStore;

pub struct AppState {
    pub store: StatsStore,
    pub fetchers: StatFetchers,
    pub scraper: PlayStoreScraper,
    pub dashboard: Dashboard,
    pub event_bus: EventBus,
    pub cron: CronConfig,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/downloads", get(routes::api_downloads))
        .route("/api/admin/update-stats", post(routes::api_update_stats))
        .route("/api/spinwheel", get(routes::api_spinwheel))
        .route("/api/cron/fetch-downloads", get(routes::api_cron_fetch_downloads))
        .route("/api/dashboard", get(routes::api_dashboard))
        .route("/api/dashboard/events", get(sse::events_handler))
        // Every counter must be read fresh
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: &Config, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let addr = config.bind_address();
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
