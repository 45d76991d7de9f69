//! Live dashboard feed
//!
//! Every snapshot the dashboard publishes goes out as a `stats` event whose
//! data is the same JSON `/api/dashboard` returns.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::AppState;
use crate::dashboard::Snapshot;

pub const STATS_EVENT: &str = "stats";
const KEEP_ALIVE: Duration = Duration::from_secs(15);

fn stats_event(snapshot: &Snapshot) -> Option<Event> {
    Event::default()
        .event(STATS_EVENT)
        .json_data(snapshot)
        .inspect_err(|e| warn!("Failed to encode dashboard snapshot: {}", e))
        .ok()
}

pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let snapshots = BroadcastStream::new(state.event_bus.subscribe());

    let events = snapshots.filter_map(|received| match received {
        Ok(snapshot) => stats_event(&snapshot).map(Ok),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            debug!("Dashboard viewer lagged, skipped {} snapshots", skipped);
            None
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::dashboard::{Dashboard, Message, Metric};
    use crate::events::EventBus;
    use crate::fetchers::StatFetchers;
    use crate::playstore::PlayStoreScraper;
    use crate::store::StatsStore;
    use crate::testutil::{dead_upstream, spawn_upstream};
    use crate::web::router;

    #[tokio::test]
    async fn applied_batch_reaches_viewers_as_stats_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dead_upstream().await, dir.path().join("downloads.json"));
        let client = reqwest::Client::new();
        let store = StatsStore::new(&config.store.path);
        let event_bus = EventBus::with_capacity(16);
        let dashboard = Dashboard::new(event_bus.clone());
        let state = Arc::new(AppState {
            fetchers: StatFetchers::new(client.clone(), &config, store.clone()),
            scraper: PlayStoreScraper::new(client.clone(), &config.upstream),
            dashboard: dashboard.clone(),
            event_bus,
            store,
            cron: config.cron.clone(),
        });
        let base = spawn_upstream(router(state)).await;

        // Headers arrive once the handler has subscribed
        let mut response = client
            .get(format!("{}/api/dashboard/events", base))
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        dashboard
            .apply(Message::Samples(vec![(Metric::Revenue, Ok(5000))]))
            .await;

        let mut received = String::new();
        while !received.contains("\n\n") {
            let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
                .await
                .expect("event within timeout")
                .unwrap()
                .expect("stream still open");
            received.push_str(&String::from_utf8_lossy(&chunk));
        }

        assert!(received.starts_with("event: stats\n"), "got {:?}", received);
        let data = received
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .expect("data line");
        let snapshot: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(snapshot["metrics"]["revenue"]["current"], 5000);
        assert_eq!(snapshot["metrics"]["revenue"]["display"], "5,000");
    }
}
