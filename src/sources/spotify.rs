//! Spotify play count provider
//!
//! The public Web API does not expose play counts, so the count is read from
//! the rendered track page.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::{check_status, parse_grouped_count, FetchError, SourceProvider};

/// Extracts the track ID from an `open.spotify.com` track URL
pub fn extract_track_id(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"track/([a-zA-Z0-9]+)").expect("valid regex"));
    re.captures(url).map(|c| c[1].to_string())
}

/// Scrapes the play count from a track page
#[derive(Debug, Clone)]
pub struct SpotifyPageProvider {
    client: Client,
    track_url: String,
}

impl SpotifyPageProvider {
    pub fn new(client: Client, track_url: String) -> Self {
        Self { client, track_url }
    }
}

/// Finds the play count in a track page
///
/// Prefers the element tagged `data-testid="playcount"`; otherwise takes the
/// first element whose whole text is a grouped number such as `1 350 186`.
fn parse_track_page(html: &str) -> Result<u64, FetchError> {
    static TAGGED: OnceLock<Regex> = OnceLock::new();
    static GROUPED: OnceLock<Regex> = OnceLock::new();

    let tagged = TAGGED.get_or_init(|| {
        Regex::new(r#"data-testid="playcount"[^>]*>([^<]+)<"#).expect("valid regex")
    });
    if let Some(caps) = tagged.captures(html) {
        return parse_grouped_count(&caps[1])
            .ok_or_else(|| FetchError::Parse(format!("invalid playcount '{}'", caps[1].trim())));
    }

    let grouped = GROUPED.get_or_init(|| {
        Regex::new(r">\s*(\d{1,3}(?:[\s,.]\d{3})+)\s*<").expect("valid regex")
    });
    grouped
        .captures(html)
        .and_then(|caps| parse_grouped_count(&caps[1]))
        .ok_or_else(|| FetchError::Parse("playcount not found in page".to_string()))
}

#[async_trait]
impl SourceProvider for SpotifyPageProvider {
    fn kind(&self) -> &'static str {
        "spotify-page"
    }

    async fn fetch(&self) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(&self.track_url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;
        let html = check_status(response)?.text().await?;

        parse_track_page(&html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_track_id() {
        assert_eq!(
            extract_track_id("https://open.spotify.com/intl-fr/track/0QSFpVVi5h1TrYG69WMTg7")
                .as_deref(),
            Some("0QSFpVVi5h1TrYG69WMTg7")
        );
        assert_eq!(extract_track_id("https://open.spotify.com/album/abc"), None);
    }

    #[test]
    fn test_parse_track_page_tagged_element() {
        let html = r#"<span data-encore-id="text" data-testid="playcount" class="x">1 405 124</span>"#;
        assert_eq!(parse_track_page(html).unwrap(), 1_405_124);
    }

    #[test]
    fn test_parse_track_page_grouped_number_fallback() {
        let html = "<div><span>Song</span><span>1\u{a0}350\u{a0}186</span></div>";
        assert_eq!(parse_track_page(html).unwrap(), 1_350_186);
    }

    #[test]
    fn test_parse_track_page_ignores_short_numbers() {
        let html = "<span>2024</span><span>3:45</span>";
        assert!(matches!(parse_track_page(html), Err(FetchError::Parse(_))));
    }

    #[test]
    fn test_parse_track_page_tagged_but_unparseable() {
        let html = r#"<span data-testid="playcount">n/a</span>"#;
        assert!(matches!(parse_track_page(html), Err(FetchError::Parse(_))));
    }
}
