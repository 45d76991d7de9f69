//! File-backed stats document
//!
//! The document is the single source of truth for revenue and monthly users,
//! and caches the last scraped download counts. Reads never fail: a missing
//! file, malformed JSON or a field of the wrong type falls back to defaults
//! field by field. Writes are read-merge-write with last-writer-wins, and the
//! new document replaces the old one with a rename so a reader only ever sees
//! a complete file.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

use crate::error::StoreError;

pub const DEFAULT_REVENUE: u64 = 100_003;
pub const DEFAULT_USERS_THIS_MONTH: u64 = 0;
pub const DEFAULT_DOWNLOADS: u64 = 10_000;

/// Suffix counter for staging files, unique per write within the process
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRecord {
    pub playstore: u64,
    pub appstore: u64,
    pub revenue: u64,
    pub users_this_month: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for StatsRecord {
    fn default() -> Self {
        Self {
            playstore: DEFAULT_DOWNLOADS,
            appstore: DEFAULT_DOWNLOADS,
            revenue: DEFAULT_REVENUE,
            users_this_month: DEFAULT_USERS_THIS_MONTH,
            last_updated: Utc::now(),
        }
    }
}

impl StatsRecord {
    /// Build a record from whatever JSON is on disk, keeping each valid field
    fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let counter = |key: &str, default: u64| value.get(key).and_then(as_counter).unwrap_or(default);

        Self {
            playstore: counter("playstore", defaults.playstore),
            appstore: counter("appstore", defaults.appstore),
            revenue: counter("revenue", defaults.revenue),
            users_this_month: counter("usersThisMonth", defaults.users_this_month),
            last_updated: value
                .get("lastUpdated")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(defaults.last_updated),
        }
    }
}

/// Non-negative JSON numbers; fractions are truncated
fn as_counter(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.trunc() as u64)
    })
}

/// Fields the admin page may change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsUpdate {
    pub revenue: u64,
    /// `None` keeps the stored value
    pub users_this_month: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> StatsRecord {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StatsRecord::default(),
            Err(e) => {
                warn!("Failed to read stats file {}: {}", self.path.display(), e);
                return StatsRecord::default();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => StatsRecord::from_value(&value),
            Err(e) => {
                warn!("Stats file {} is not valid JSON: {}", self.path.display(), e);
                StatsRecord::default()
            }
        }
    }

    /// Overlay revenue and monthly users on the stored record
    pub async fn write(&self, update: StatsUpdate) -> Result<StatsRecord, StoreError> {
        self.merge(|record| {
            record.revenue = update.revenue;
            if let Some(users) = update.users_this_month {
                record.users_this_month = users;
            }
        })
        .await
    }

    /// Record a freshly scraped Play Store count
    pub async fn set_playstore(&self, downloads: u64) -> Result<StatsRecord, StoreError> {
        self.merge(|record| record.playstore = downloads).await
    }

    async fn merge(&self, apply: impl FnOnce(&mut StatsRecord)) -> Result<StatsRecord, StoreError> {
        let mut record = self.read().await;
        let previous_stamp = record.last_updated;

        apply(&mut record);

        // lastUpdated only moves forward, even across clock steps
        let now = Utc::now();
        record.last_updated = if now > previous_stamp {
            now
        } else {
            previous_stamp + Duration::milliseconds(1)
        };

        self.persist(&record).await.inspect_err(|e| {
            error!("Error writing stats file: {}", e);
        })?;

        Ok(record)
    }

    async fn persist(&self, record: &StatsRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(record)?;
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        }

        // Stage next to the target so the rename stays on one filesystem
        let staging = self.staging_path();
        let result = match tokio::fs::write(&staging, body).await {
            Ok(()) => tokio::fs::rename(&staging, &self.path).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&staging).await;
        }

        result.map_err(io_err)
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stats".to_string());
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
    }
}
