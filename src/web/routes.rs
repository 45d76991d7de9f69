//! HTTP routes

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::AppState;
use crate::dashboard::Snapshot;
use crate::store::{StatsRecord, StatsUpdate};

/// API: Current stats document, defaults filled in
pub async fn api_downloads(State(state): State<Arc<AppState>>) -> Json<StatsRecord> {
    Json(state.store.read().await)
}

/// API: Proxy for the spin-wheel lead counter; 0 when the upstream is down
pub async fn api_spinwheel(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "count": state.fetchers.spinwheel().await }))
}

/// API: Every polled metric with its previous value and change
pub async fn api_dashboard(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.dashboard.snapshot().await)
}

fn counter_field(body: &Value, field: &str) -> Result<Option<u64>, String> {
    let value = match body.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };

    let Value::Number(n) = value else {
        return Err(format!("Invalid data format. {} must be a number.", field));
    };

    if let Some(count) = n.as_u64() {
        return Ok(Some(count));
    }

    // 2^64 is exactly representable; anything at or above it would saturate
    match n.as_f64() {
        Some(f) if f < 0.0 => Err(format!("{} must be a non-negative number.", field)),
        Some(f) if f.fract() != 0.0 => Err(format!("{} must be a whole number.", field)),
        Some(f) if f < u64::MAX as f64 => Ok(Some(f as u64)),
        _ => Err(format!("{} is out of range.", field)),
    }
}

/// Check an admin update body before anything is written
pub fn validate_update(body: &Value) -> Result<StatsUpdate, String> {
    let revenue = counter_field(body, "revenue")?
        .ok_or_else(|| "Invalid data format. revenue must be a number.".to_string())?;
    let users_this_month = counter_field(body, "usersThisMonth")?;

    Ok(StatsUpdate {
        revenue,
        users_this_month,
    })
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    success: bool,
    message: &'static str,
    data: StatsRecord,
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(json!({ "success": false, "error": error.into() }))).into_response()
}

/// API: Set revenue (and optionally monthly users) from the admin page
pub async fn api_update_stats(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let update = match validate_update(&body) {
        Ok(update) => update,
        Err(message) => {
            warn!("Rejected stats update: {}", message);
            return failure(StatusCode::BAD_REQUEST, message);
        }
    };

    match state.store.write(update).await {
        Ok(record) => {
            info!(revenue = record.revenue, users_this_month = record.users_this_month, "Statistics updated");
            Json(UpdateResponse {
                success: true,
                message: "Statistics updated successfully",
                data: record,
            })
            .into_response()
        }
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn bearer_matches(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

/// API: Scrape the Play Store install count and store it
pub async fn api_cron_fetch_downloads(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.cron.secret() {
        if !bearer_matches(&headers, secret) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
        }
    }

    let package_name = &state.cron.package_name;
    info!("Fetching downloads for: {}", package_name);

    let downloads = match state.scraper.fetch_downloads(package_name).await {
        Ok(downloads) => downloads,
        Err(e) => {
            error!("Error in cron fetch-downloads: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": e.to_string(),
                    "details": format!("{:?}", e),
                })),
            )
                .into_response();
        }
    };

    info!("Fetched downloads: {}", downloads);

    match state.store.set_playstore(downloads).await {
        Ok(record) => Json(json!({
            "success": true,
            "message": "Downloads fetched successfully",
            "downloads": {
                "playstore": record.playstore,
                "lastUpdated": record.last_updated,
            },
        }))
        .into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::config::Config;
    use crate::dashboard::Dashboard;
    use crate::events::EventBus;
    use crate::fetchers::StatFetchers;
    use crate::playstore::PlayStoreScraper;
    use crate::store::{StatsStore, DEFAULT_REVENUE};
    use crate::testutil::{dead_upstream, spawn_upstream};
    use crate::web::router;
    use axum::http::{HeaderName, HeaderValue};
    use axum::{routing::get, Router};
    use axum_test::TestServer;

    fn state(config: &Config) -> Arc<AppState> {
        let client = reqwest::Client::new();
        let store = StatsStore::new(&config.store.path);
        let event_bus = EventBus::with_capacity(16);

        Arc::new(AppState {
            fetchers: StatFetchers::new(client.clone(), config, store.clone()),
            scraper: PlayStoreScraper::new(client, &config.upstream),
            dashboard: Dashboard::new(event_bus.clone()),
            event_bus,
            store,
            cron: config.cron.clone(),
        })
    }

    fn server(config: &Config) -> TestServer {
        TestServer::new(router(state(config))).expect("test server")
    }

    #[test]
    fn validation_rules() {
        assert_eq!(
            validate_update(&json!({"revenue": 100})),
            Ok(StatsUpdate {
                revenue: 100,
                users_this_month: None
            })
        );
        assert_eq!(
            validate_update(&json!({"revenue": 100.0, "usersThisMonth": 3})),
            Ok(StatsUpdate {
                revenue: 100,
                users_this_month: Some(3)
            })
        );
        assert!(validate_update(&json!({"revenue": -1})).is_err());
        assert!(validate_update(&json!({"revenue": "abc"})).is_err());
        assert!(validate_update(&json!({"revenue": "100"})).is_err());
        assert!(validate_update(&json!({"revenue": 10.5})).is_err());
        assert!(validate_update(&json!({})).is_err());
        assert!(validate_update(&json!({"revenue": 100, "usersThisMonth": -5})).is_err());
        assert!(validate_update(&json!({"revenue": 100, "usersThisMonth": "many"})).is_err());
    }

    #[test]
    fn validation_rejects_values_beyond_u64() {
        assert_eq!(
            validate_update(&json!({"revenue": 1e25})),
            Err("revenue is out of range.".to_string())
        );
        assert!(validate_update(&json!({"revenue": 1, "usersThisMonth": 1.8446744073709552e19})).is_err());
        assert_eq!(
            validate_update(&json!({"revenue": 1e18})),
            Ok(StatsUpdate {
                revenue: 1_000_000_000_000_000_000,
                users_this_month: None
            })
        );
    }

    #[tokio::test]
    async fn downloads_returns_defaults_with_no_cache_headers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dead_upstream().await, dir.path().join("downloads.json"));

        let response = server(&config).get("/api/downloads").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.header("cache-control"), "no-cache, no-store, must-revalidate");
        assert_eq!(response.header("pragma"), "no-cache");
        assert_eq!(response.header("expires"), "0");

        let body: Value = response.json();
        assert_eq!(body["revenue"], json!(DEFAULT_REVENUE));
        assert_eq!(body["usersThisMonth"], json!(0));
        assert_eq!(body["playstore"], json!(10_000));
        assert_eq!(body["appstore"], json!(10_000));
        assert!(body["lastUpdated"].is_string());
    }

    #[tokio::test]
    async fn update_stats_rejects_invalid_bodies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dead_upstream().await, dir.path().join("downloads.json"));
        let server = server(&config);

        for body in [
            json!({"revenue": -1}),
            json!({"revenue": "abc"}),
            json!({"revenue": 100, "usersThisMonth": -5}),
            json!({"revenue": 1e25}),
        ] {
            let response = server.post("/api/admin/update-stats").json(&body).await;
            assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "body {}", body);
        }

        let response = server
            .post("/api/admin/update-stats")
            .text("{not json")
            .content_type("application/json")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        assert!(!config.store.path.exists());
    }

    #[tokio::test]
    async fn update_stats_persists_and_keeps_users_when_omitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dead_upstream().await, dir.path().join("downloads.json"));
        let server = server(&config);

        let response = server
            .post("/api/admin/update-stats")
            .json(&json!({"revenue": 5000, "usersThisMonth": 12}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["revenue"], json!(5000));

        let response = server
            .post("/api/admin/update-stats")
            .json(&json!({"revenue": 7000}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let body: Value = server.get("/api/downloads").await.json();
        assert_eq!(body["revenue"], json!(7000));
        assert_eq!(body["usersThisMonth"], json!(12));
    }

    #[tokio::test]
    async fn update_stats_reports_persistence_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let config = test_config(&dead_upstream().await, blocker.join("downloads.json"));

        let response = server(&config)
            .post("/api/admin/update-stats")
            .json(&json!({"revenue": 1}))
            .await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn spinwheel_proxies_and_falls_back_to_zero() {
        let router = Router::new().route("/leads/count", get(|| async { Json(json!({"count": 62})) }));
        let base = spawn_upstream(router).await;
        let dir = tempfile::tempdir().expect("tempdir");

        let config = test_config(&base, dir.path().join("downloads.json"));
        let body: Value = server(&config).get("/api/spinwheel").await.json();
        assert_eq!(body, json!({"count": 62}));

        let config = test_config(&dead_upstream().await, dir.path().join("downloads.json"));
        let response = server(&config).get("/api/spinwheel").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>(), json!({"count": 0}));
    }

    #[tokio::test]
    async fn cron_requires_matching_bearer_when_configured() {
        let router = Router::new().route(
            "/store/apps/details",
            get(|| async { "<html><body><span>50K+</span> <span>Downloads</span></body></html>" }),
        );
        let base = spawn_upstream(router).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(&base, dir.path().join("downloads.json"));
        config.cron.secret = "s3cret".to_string();
        let server = server(&config);

        let response = server.get("/api/cron/fetch-downloads").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server
            .get("/api/cron/fetch-downloads")
            .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server
            .get("/api/cron/fetch-downloads")
            .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["downloads"]["playstore"], json!(50_000));

        let stored: Value = server.get("/api/downloads").await.json();
        assert_eq!(stored["playstore"], json!(50_000));
        assert_eq!(stored["revenue"], json!(DEFAULT_REVENUE));
    }

    #[tokio::test]
    async fn cron_reports_scrape_failure() {
        let router = Router::new().route(
            "/store/apps/details",
            get(|| async { "<html><body>No numbers</body></html>" }),
        );
        let base = spawn_upstream(router).await;
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&base, dir.path().join("downloads.json"));

        let response = server(&config).get("/api/cron/fetch-downloads").await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("could not find download count on Play Store page"));
        assert!(!config.store.path.exists());
    }

    #[tokio::test]
    async fn dashboard_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dead_upstream().await, dir.path().join("downloads.json"));

        let body: Value = server(&config).get("/api/dashboard").await.json();
        assert_eq!(body["metrics"], json!({}));
        assert_eq!(body["clock"], Value::Null);
    }

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(!bearer_matches(&headers, "s3cret"));
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("s3cret"),
        );
        assert!(!bearer_matches(&headers, "s3cret"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(bearer_matches(&headers, "s3cret"));
    }
}
