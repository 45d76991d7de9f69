//! One fetcher per upstream counter
//!
//! Every source has a fallible `try_*` form, used by the dashboard poller so a
//! failed tick can leave the displayed sample untouched, and an infallible
//! form that logs the failure and degrades to 0.

use chrono::Utc;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::Value;
use tracing::warn;

use crate::config::{Config, UpstreamConfig, DEFAULT_SUBSCRIPTION_BASELINE};
use crate::error::FetchError;
use crate::parse::{parse_count, SPINWHEEL_KEYS, SUBSCRIPTION_KEYS, WAITLIST_KEYS};
use crate::store::StatsStore;

/// Spots on the waitlist; upstream reports how many remain
pub const WAITLIST_CAPACITY: i64 = 1000;

/// Spots taken, given the upstream's remaining count, clamped to the capacity
pub fn filled_from_remaining(remaining: i64) -> u64 {
    (WAITLIST_CAPACITY.saturating_sub(remaining)).clamp(0, WAITLIST_CAPACITY) as u64
}

/// Subscriptions gained since `baseline`, never negative
pub fn subscription_delta(total: u64, baseline: i64) -> u64 {
    (total as i64).saturating_sub(baseline).max(0) as u64
}

fn non_negative(count: i64) -> u64 {
    count.max(0) as u64
}

fn or_zero(source: &str, result: Result<u64, FetchError>) -> u64 {
    match result {
        Ok(count) => count,
        Err(e) => {
            warn!(source, error = %e, "Error fetching {}", source);
            0
        }
    }
}

#[derive(Clone)]
pub struct StatFetchers {
    client: reqwest::Client,
    upstream: UpstreamConfig,
    baseline: i64,
    store: StatsStore,
}

impl StatFetchers {
    pub fn new(client: reqwest::Client, config: &Config, store: StatsStore) -> Self {
        let mut baseline = config.dashboard.subscription_baseline;
        if baseline <= 0 {
            warn!(
                "Invalid subscription baseline {}, using {}",
                baseline, DEFAULT_SUBSCRIPTION_BASELINE
            );
            baseline = DEFAULT_SUBSCRIPTION_BASELINE;
        }

        Self {
            client,
            upstream: config.upstream.clone(),
            baseline,
            store,
        }
    }

    /// GET with a timestamp query parameter and `no-store`, so no cache in
    /// between can serve a stale counter
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut url = reqwest::Url::parse(url).map_err(|_| FetchError::Url(url.to_string()))?;
        url.query_pairs_mut()
            .append_pair("_", &Utc::now().timestamp_millis().to_string());

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        Ok(response.json::<Value>().await?)
    }

    pub async fn try_subscriptions(&self) -> Result<u64, FetchError> {
        let payload = self.get_json(&self.upstream.subscriptions_url).await?;
        Ok(non_negative(parse_count(&payload, &SUBSCRIPTION_KEYS)))
    }

    pub async fn try_waitlist_filled(&self) -> Result<u64, FetchError> {
        let payload = self.get_json(&self.upstream.waitlist_url).await?;
        Ok(filled_from_remaining(parse_count(&payload, &WAITLIST_KEYS)))
    }

    pub async fn try_spinwheel(&self) -> Result<u64, FetchError> {
        let payload = self.get_json(&self.upstream.spinwheel_url).await?;
        Ok(non_negative(parse_count(&payload, &SPINWHEEL_KEYS)))
    }

    // The stats document is local, so these cannot fail.

    pub async fn try_revenue(&self) -> Result<u64, FetchError> {
        Ok(self.store.read().await.revenue)
    }

    pub async fn try_users_this_month(&self) -> Result<u64, FetchError> {
        Ok(self.store.read().await.users_this_month)
    }

    pub async fn try_playstore_downloads(&self) -> Result<u64, FetchError> {
        Ok(self.store.read().await.playstore)
    }

    pub async fn try_appstore_downloads(&self) -> Result<u64, FetchError> {
        Ok(self.store.read().await.appstore)
    }

    pub async fn subscriptions(&self) -> u64 {
        or_zero("subscriptions", self.try_subscriptions().await)
    }

    pub async fn waitlist_filled(&self) -> u64 {
        or_zero("waitlist", self.try_waitlist_filled().await)
    }

    pub async fn spinwheel(&self) -> u64 {
        or_zero("spinwheel", self.try_spinwheel().await)
    }

    pub async fn revenue(&self) -> u64 {
        or_zero("revenue", self.try_revenue().await)
    }

    pub async fn users_this_month(&self) -> u64 {
        or_zero("users this month", self.try_users_this_month().await)
    }

    pub async fn playstore_downloads(&self) -> u64 {
        or_zero("playstore downloads", self.try_playstore_downloads().await)
    }

    pub async fn appstore_downloads(&self) -> u64 {
        or_zero("appstore downloads", self.try_appstore_downloads().await)
    }

    pub fn subscriptions_since_baseline(&self, total: u64) -> u64 {
        subscription_delta(total, self.baseline)
    }
}
