//! Aggregated dashboard state and the polling tiers that feed it
//!
//! Tier tasks own their timers and only send readings over a channel; a single
//! writer task applies them to the shared state. A failed reading leaves the
//! metric's sample as it was, so an upstream outage never corrupts the trend.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::DashboardConfig;
use crate::error::FetchError;
use crate::events::EventBus;
use crate::fetchers::StatFetchers;
use crate::parse::{calculate_change, format_number, Change};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    PlaystoreDownloads,
    AppstoreDownloads,
    Subscriptions,
    /// Subscriptions gained since the configured baseline
    SubscriptionsSinceBaseline,
    Waitlist,
    SpinWheel,
    Revenue,
    UsersThisMonth,
}

/// Where a metric's value comes from. The since-baseline metric has no
/// source of its own; it is derived from a subscriptions reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Subscriptions,
    PlaystoreDownloads,
    AppstoreDownloads,
    Revenue,
    UsersThisMonth,
    Waitlist,
    SpinWheel,
}

impl Source {
    /// Lower-latency sources, re-polled on the fast tier
    pub const FAST: &'static [Source] = &[
        Source::Subscriptions,
        Source::PlaystoreDownloads,
        Source::AppstoreDownloads,
        Source::Revenue,
        Source::UsersThisMonth,
    ];

    /// Less time-sensitive sources, re-polled on the slow tier
    pub const SLOW: &'static [Source] = &[Source::Waitlist, Source::SpinWheel];

    pub fn metric(self) -> Metric {
        match self {
            Source::Subscriptions => Metric::Subscriptions,
            Source::PlaystoreDownloads => Metric::PlaystoreDownloads,
            Source::AppstoreDownloads => Metric::AppstoreDownloads,
            Source::Revenue => Metric::Revenue,
            Source::UsersThisMonth => Metric::UsersThisMonth,
            Source::Waitlist => Metric::Waitlist,
            Source::SpinWheel => Metric::SpinWheel,
        }
    }

    async fn fetch(self, fetchers: &StatFetchers) -> Result<u64, FetchError> {
        match self {
            Source::Subscriptions => fetchers.try_subscriptions().await,
            Source::PlaystoreDownloads => fetchers.try_playstore_downloads().await,
            Source::AppstoreDownloads => fetchers.try_appstore_downloads().await,
            Source::Revenue => fetchers.try_revenue().await,
            Source::UsersThisMonth => fetchers.try_users_this_month().await,
            Source::Waitlist => fetchers.try_waitlist_filled().await,
            Source::SpinWheel => fetchers.try_spinwheel().await,
        }
    }
}

pub type Reading = (Metric, Result<u64, FetchError>);

/// Fetch `sources` concurrently. A successful subscriptions reading also
/// yields the since-baseline metric.
pub async fn fetch_metrics(fetchers: &StatFetchers, sources: &[Source]) -> Vec<Reading> {
    let mut readings = futures::future::join_all(
        sources
            .iter()
            .map(|&source| async move { (source.metric(), source.fetch(fetchers).await) }),
    )
    .await;

    let delta = readings.iter().find_map(|(metric, result)| match (metric, result) {
        (Metric::Subscriptions, Ok(total)) => Some(fetchers.subscriptions_since_baseline(*total)),
        _ => None,
    });
    if let Some(delta) = delta {
        readings.push((Metric::SubscriptionsSinceBaseline, Ok(delta)));
    }

    readings
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricSample {
    pub current: u64,
    pub previous: u64,
}

impl MetricSample {
    /// First reading: no artificial prior value
    pub fn seed(value: u64) -> Self {
        Self {
            current: value,
            previous: value,
        }
    }

    pub fn shift(&mut self, value: u64) {
        self.previous = self.current;
        self.current = value;
    }
}

#[derive(Debug)]
pub enum Message {
    /// First fan-out after start; every sample is seeded
    Initial(Vec<Reading>),
    /// A tier tick; samples shift current into previous
    Samples(Vec<Reading>),
    Clock(DateTime<Utc>),
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricView {
    pub current: u64,
    pub previous: u64,
    pub change: Change,
    pub display: String,
}

impl From<MetricSample> for MetricView {
    fn from(sample: MetricSample) -> Self {
        Self {
            current: sample.current,
            previous: sample.previous,
            change: calculate_change(sample.current, sample.previous),
            display: format_number(sample.current),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub metrics: BTreeMap<Metric, MetricView>,
    pub clock: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct DashboardState {
    samples: HashMap<Metric, MetricSample>,
    clock: Option<DateTime<Utc>>,
}

impl DashboardState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            metrics: self
                .samples
                .iter()
                .map(|(&metric, &sample)| (metric, MetricView::from(sample)))
                .collect(),
            clock: self.clock,
        }
    }
}

#[derive(Clone)]
pub struct Dashboard {
    state: Arc<RwLock<DashboardState>>,
    events: EventBus,
}

impl Dashboard {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(DashboardState::default())),
            events,
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.snapshot()
    }

    pub async fn sample(&self, metric: Metric) -> Option<MetricSample> {
        self.state.read().await.samples.get(&metric).copied()
    }

    /// Only the writer task calls this
    pub(crate) async fn apply(&self, message: Message) {
        let mut state = self.state.write().await;

        let (readings, seed) = match message {
            Message::Clock(now) => {
                state.clock = Some(now);
                return;
            }
            Message::Initial(readings) => (readings, true),
            Message::Samples(readings) => (readings, false),
        };

        for (metric, result) in readings {
            match result {
                Ok(value) if seed => {
                    state.samples.insert(metric, MetricSample::seed(value));
                }
                Ok(value) => {
                    state
                        .samples
                        .entry(metric)
                        .and_modify(|sample| sample.shift(value))
                        .or_insert_with(|| MetricSample::seed(value));
                }
                Err(e) => {
                    debug!(?metric, error = %e, "Keeping previous sample");
                }
            }
        }

        let snapshot = state.snapshot();
        drop(state);
        self.events.publish(snapshot);
    }
}

/// Handles to the timer tasks feeding a [`Dashboard`]
pub struct Poller {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Poller {
    pub fn start(dashboard: Dashboard, fetchers: StatFetchers, config: &DashboardConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                dashboard.apply(message).await;
            }
            debug!("Dashboard writer shutting down");
        });

        // Tiers hold their first tick until the initial load is queued, so
        // no tier reading can reach the writer ahead of the seeds
        let (loaded_tx, loaded) = watch::channel(false);

        let initial = {
            let fetchers = fetchers.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut all = Source::FAST.to_vec();
                all.extend_from_slice(Source::SLOW);
                let readings = fetch_metrics(&fetchers, &all).await;
                let _ = tx.send(Message::Initial(readings));
                let _ = loaded_tx.send(true);
                info!("Initial dashboard load complete");
            })
        };

        let fast = spawn_tier(
            "fast",
            fetchers.clone(),
            Source::FAST,
            config.fast_interval(),
            loaded.clone(),
            tx.clone(),
        );
        let slow = spawn_tier("slow", fetchers, Source::SLOW, config.slow_interval(), loaded, tx.clone());
        let clock = spawn_clock(config.clock_interval(), tx);

        info!(
            "Dashboard polling started (fast={}s, slow={}s)",
            config.fast_interval_secs, config.slow_interval_secs
        );

        Self {
            tasks: vec![
                ("writer", writer),
                ("initial", initial),
                ("fast", fast),
                ("slow", slow),
                ("clock", clock),
            ],
        }
    }

    /// Stop every timer. Fetches in flight are dropped with their task.
    pub fn shutdown(&mut self) {
        for (name, task) in self.tasks.drain(..) {
            debug!("Stopping {} task", name);
            task.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_tier(
    name: &'static str,
    fetchers: StatFetchers,
    sources: &'static [Source],
    period: Duration,
    mut loaded: watch::Receiver<bool>,
    tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if loaded.wait_for(|done| *done).await.is_err() {
            return;
        }

        // The initial load covers the first period
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            debug!("Polling {} tier", name);
            let readings = fetch_metrics(&fetchers, sources).await;
            if tx.send(Message::Samples(readings)).is_err() {
                break;
            }
        }
    })
}

fn spawn_clock(period: Duration, tx: mpsc::UnboundedSender<Message>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if tx.send(Message::Clock(Utc::now())).is_err() {
                break;
            }
        }
    })
}
