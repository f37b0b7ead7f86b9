//! Count sources
//!
//! Every external source is reached through the [`SourceProvider`] trait.
//! Providers are thin I/O adapters: they perform exactly one attempt per
//! `fetch` call and never touch the cache. Retries, timeouts and fallbacks
//! belong to the refresh controller.

pub mod spotify;
pub mod youtube;

pub use spotify::{extract_track_id, SpotifyPageProvider};
pub use youtube::{extract_video_id, YouTubeApiProvider, YouTubePageProvider};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;

use crate::config::ProviderConfig;

/// User agent sent with every request; several sources refuse bare clients
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Why a single fetch attempt failed
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS or body read failure
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success status not covered by a more specific variant
    #[error("unexpected HTTP status {0}")]
    Http(u16),

    /// The source asked us to slow down
    #[error("rate limited by source")]
    RateLimited,

    /// Credentials missing, rejected or expired
    #[error("authorization rejected (HTTP {0})")]
    Unauthorized(u16),

    /// The response did not contain a recognizable count
    #[error("failed to parse count: {0}")]
    Parse(String),

    /// The requested item does not exist at the source
    #[error("not found: {0}")]
    NotFound(String),

    /// The attempt exceeded the caller's deadline
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Short label used in log fields
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Http(_) => "http",
            FetchError::RateLimited => "rate-limited",
            FetchError::Unauthorized(_) => "unauthorized",
            FetchError::Parse(_) => "parse",
            FetchError::NotFound(_) => "not-found",
            FetchError::Timeout(_) => "timeout",
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Http(status) => *status >= 500,
            _ => false,
        }
    }
}

/// Capability to fetch one source's current count
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Provider kind, for logs
    fn kind(&self) -> &'static str;

    /// Performs a single fetch attempt
    async fn fetch(&self) -> Result<u64, FetchError>;
}

/// Provider returning a configured constant, for offline use
#[derive(Debug, Clone)]
pub struct FixedProvider {
    count: u64,
}

impl FixedProvider {
    pub fn new(count: u64) -> Self {
        Self { count }
    }
}

#[async_trait]
impl SourceProvider for FixedProvider {
    fn kind(&self) -> &'static str {
        "fixed"
    }

    async fn fetch(&self) -> Result<u64, FetchError> {
        Ok(self.count)
    }
}

/// Builds the shared HTTP client used by every provider
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder().user_agent(USER_AGENT).build()
}

/// Instantiates the provider selected in configuration
pub fn build_provider(config: &ProviderConfig, client: &Client) -> Arc<dyn SourceProvider> {
    match config {
        ProviderConfig::YoutubeApi { api_key, video } => Arc::new(YouTubeApiProvider::new(
            client.clone(),
            api_key.clone(),
            extract_video_id(video).unwrap_or_else(|| video.clone()),
        )),
        ProviderConfig::YoutubePage { video_url } => {
            Arc::new(YouTubePageProvider::new(client.clone(), video_url.clone()))
        }
        ProviderConfig::SpotifyPage { track_url } => {
            Arc::new(SpotifyPageProvider::new(client.clone(), track_url.clone()))
        }
        ProviderConfig::Fixed { count } => Arc::new(FixedProvider::new(*count)),
    }
}

/// Maps non-success statuses onto fetch errors
pub(crate) fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(status_error(status))
}

fn status_error(status: StatusCode) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Unauthorized(status.as_u16())
        }
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        StatusCode::NOT_FOUND => FetchError::NotFound(status.to_string()),
        other => FetchError::Http(other.as_u16()),
    }
}

/// Parses a count written with thousands separators
///
/// Accepts `1405124`, `1 405 124`, `1,405,124` and `1.405.124` (and
/// non-breaking spaces). Returns `None` for anything else, including
/// negative numbers.
pub fn parse_grouped_count(text: &str) -> Option<u64> {
    let digits: String = text
        .trim()
        .chars()
        .filter(|c| !(c.is_whitespace() || *c == ',' || *c == '.'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grouped_count_separators() {
        assert_eq!(parse_grouped_count("1405124"), Some(1_405_124));
        assert_eq!(parse_grouped_count("1 405 124"), Some(1_405_124));
        assert_eq!(parse_grouped_count("1,405,124"), Some(1_405_124));
        assert_eq!(parse_grouped_count("1.405.124"), Some(1_405_124));
        assert_eq!(parse_grouped_count("1\u{a0}350\u{a0}186"), Some(1_350_186));
        assert_eq!(parse_grouped_count("  0 "), Some(0));
    }

    #[test]
    fn test_parse_grouped_count_rejects_garbage() {
        assert_eq!(parse_grouped_count(""), None);
        assert_eq!(parse_grouped_count("   "), None);
        assert_eq!(parse_grouped_count("-5"), None);
        assert_eq!(parse_grouped_count("12a"), None);
        assert_eq!(parse_grouped_count("99999999999999999999999"), None);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED),
            FetchError::Unauthorized(401)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN),
            FetchError::Unauthorized(403)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS),
            FetchError::RateLimited
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY),
            FetchError::Http(502)
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(FetchError::Http(503).is_transient());
        assert!(!FetchError::Http(400).is_transient());
        assert!(!FetchError::RateLimited.is_transient());
        assert!(!FetchError::Unauthorized(401).is_transient());
        assert!(!FetchError::Parse("x".into()).is_transient());
    }

    #[test]
    fn test_reason_labels_are_distinct() {
        let errors = [
            FetchError::Http(500),
            FetchError::RateLimited,
            FetchError::Unauthorized(401),
            FetchError::Parse(String::new()),
            FetchError::NotFound(String::new()),
            FetchError::Timeout(Duration::from_secs(1)),
        ];
        let mut labels: Vec<&str> = errors.iter().map(FetchError::reason).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), errors.len());
    }

    #[tokio::test]
    async fn test_fixed_provider_returns_constant() {
        let provider = FixedProvider::new(42);
        assert_eq!(provider.fetch().await.unwrap(), 42);
        assert_eq!(provider.kind(), "fixed");
    }
}
