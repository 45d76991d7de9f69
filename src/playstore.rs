//! Play Store install-count scraper
//!
//! The details page markup is undocumented and changes without notice, so the
//! count is located by a cascade of extraction strategies. Each strategy is a
//! pure function over the parsed document; the first one to find a count wins.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::config::UpstreamConfig;
use crate::error::ScrapeError;
use crate::parse::parse_downloads_string;

/// A number with an optional unit and trailing `+`, e.g. `1,00,000+`, `10M+`
const COUNT: &str = r"\d[\d,.]*[KMLkml]?\+?";

static COUNT_BEFORE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)({COUNT})\s*(?:Downloads|Installs)")).unwrap());

static COUNT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(&format!("({COUNT})")).unwrap());

static PAGE_PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(&format!(r"(?i)({COUNT})\s+Downloads")).unwrap(),
        Regex::new(&format!(r"(?i)({COUNT})\s+Installs")).unwrap(),
        Regex::new(&format!(r"(?i)Downloads[:\s]+({COUNT})")).unwrap(),
        Regex::new(&format!(r"(?i)Installs[:\s]+({COUNT})")).unwrap(),
    ]
});

static NUM_DOWNLOADS_META: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[itemprop="numDownloads"]"#).unwrap());

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Class names the details page has used for the installs block
const KNOWN_SELECTORS: &[&str] = &[
    r#"[itemprop="numDownloads"]"#,
    ".ClM7O",
    ".wVqUob .ClM7O",
    ".htlgb .htlgb",
    ".BgcNfc",
    ".AYi5wd",
];

static KNOWN: Lazy<Vec<Selector>> = Lazy::new(|| {
    KNOWN_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

type Strategy = fn(&Html) -> Option<String>;

/// Cheapest and most specific first, brute-force text scan last
const STRATEGIES: &[(&str, Strategy)] = &[
    ("labelled text", labelled_text),
    ("meta tag", meta_tag),
    ("known selectors", known_selectors),
    ("page text", page_text),
];

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// An element whose text reads like "10M+ Downloads". The root's text spans
/// every element, so the first matching element in document order is the root.
pub fn labelled_text(doc: &Html) -> Option<String> {
    let text: String = doc.root_element().text().collect();
    capture(&COUNT_BEFORE_LABEL, &text)
}

/// `<meta itemprop="numDownloads" content="...">`
pub fn meta_tag(doc: &Html) -> Option<String> {
    doc.select(&NUM_DOWNLOADS_META)
        .find_map(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn known_selectors(doc: &Html) -> Option<String> {
    KNOWN.iter().find_map(|selector| {
        doc.select(selector).find_map(|el| {
            let text: String = el.text().collect();
            capture(&COUNT_TOKEN, text.trim())
        })
    })
}

/// Count-before-label and label-before-count over the body text
pub fn page_text(doc: &Html) -> Option<String> {
    let text: String = doc
        .select(&BODY)
        .next()
        .map(|body| body.text().collect())
        .unwrap_or_default();

    PAGE_PATTERNS.iter().find_map(|re| capture(re, &text))
}

/// Run the strategy cascade over a raw HTML document
pub fn extract_downloads(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    STRATEGIES.iter().find_map(|(name, strategy)| {
        let found = strategy(&doc)?;
        debug!("Download count found by {} strategy: {:?}", name, found);
        Some(found)
    })
}

#[derive(Clone)]
pub struct PlayStoreScraper {
    client: reqwest::Client,
    details_url: String,
    user_agent: String,
}

impl PlayStoreScraper {
    pub fn new(client: reqwest::Client, upstream: &UpstreamConfig) -> Self {
        Self {
            client,
            details_url: upstream.playstore_url.clone(),
            user_agent: upstream.user_agent.clone(),
        }
    }

    /// Scrape the install count for `package_name`
    pub async fn fetch_downloads(&self, package_name: &str) -> Result<u64, ScrapeError> {
        let response = self
            .client
            .get(&self.details_url)
            .query(&[("id", package_name)])
            .header(USER_AGENT, &self.user_agent)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status()));
        }

        let html = response.text().await?;
        let raw = extract_downloads(&html).ok_or(ScrapeError::NotFound)?;
        let downloads = parse_downloads_string(&raw);

        info!("Scraped downloads string: {:?} -> {}", raw, downloads);

        Ok(downloads)
    }
}
