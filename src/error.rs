//! Error types shared by the store, the fetchers and the scraper

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write stats document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode stats document: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid upstream url '{0}'")]
    Url(String),
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to fetch Play Store page: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to fetch Play Store page: {0}")]
    Status(reqwest::StatusCode),

    #[error("could not find download count on Play Store page")]
    NotFound,
}
