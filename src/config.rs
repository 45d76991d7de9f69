//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Subscription total the "since baseline" metric counts up from
pub const DEFAULT_SUBSCRIPTION_BASELINE: i64 = 2513;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub upstream: UpstreamConfig,
    pub cron: CronConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON document holding revenue, monthly users and download counters
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub subscriptions_url: String,
    pub waitlist_url: String,
    pub spinwheel_url: String,
    /// Details page; the package name is appended as `?id=`
    pub playstore_url: String,
    /// The Play Store refuses clients that don't look like a browser
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    /// Bearer token expected on the cron endpoint. Empty disables the check.
    #[serde(default)]
    pub secret: String,
    pub package_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    pub subscription_baseline: i64,
    pub fast_interval_secs: u64,
    pub slow_interval_secs: u64,
    pub clock_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl CronConfig {
    pub fn secret(&self) -> Option<&str> {
        let secret = self.secret.trim();
        (!secret.is_empty()).then_some(secret)
    }
}

impl DashboardConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_secs(self.fast_interval_secs)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_secs(self.slow_interval_secs)
    }

    pub fn clock_interval(&self) -> Duration {
        Duration::from_secs(self.clock_interval_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config";

        let builder = Self::defaults(config::Config::builder())?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("STATSBOARD").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(builder
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.http_port", 3000_i64)?
            .set_default("store.path", "data/downloads.json")?
            .set_default("upstream.subscriptions_url", "https://savart.com/workflow/secret_api")?
            .set_default("upstream.waitlist_url", "https://savart.com/excel/p4_waitlist_count")?
            .set_default("upstream.spinwheel_url", "https://gen4-launch.vercel.app/api/leads/count")?
            .set_default("upstream.playstore_url", "https://play.google.com/store/apps/details")?
            .set_default(
                "upstream.user_agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
            )?
            .set_default("cron.secret", "")?
            .set_default("cron.package_name", "com.savart")?
            .set_default("dashboard.subscription_baseline", DEFAULT_SUBSCRIPTION_BASELINE)?
            .set_default("dashboard.fast_interval_secs", 30_i64)?
            .set_default("dashboard.slow_interval_secs", 60_i64)?
            .set_default("dashboard.clock_interval_secs", 1_i64)?
            .set_default("logging.level", "info")?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 {
            anyhow::bail!("Invalid http_port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        if self.store.path.as_os_str().is_empty() {
            anyhow::bail!("Store path cannot be empty");
        }

        for (name, url) in [
            ("subscriptions_url", &self.upstream.subscriptions_url),
            ("waitlist_url", &self.upstream.waitlist_url),
            ("spinwheel_url", &self.upstream.spinwheel_url),
            ("playstore_url", &self.upstream.playstore_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                anyhow::bail!("Invalid upstream {}: '{}'", name, url);
            }
        }

        if self.cron.package_name.trim().is_empty() {
            anyhow::bail!("Cron package_name cannot be empty");
        }

        if self.dashboard.fast_interval_secs == 0
            || self.dashboard.slow_interval_secs == 0
            || self.dashboard.clock_interval_secs == 0
        {
            anyhow::bail!("Dashboard intervals must be at least one second");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
