//! YouTube view count providers
//!
//! Two interchangeable ways to read a video's view count: the official
//! Data API (needs an API key) and the public watch page.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use super::{check_status, FetchError, SourceProvider};

/// Base URL for the YouTube Data API videos endpoint
const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

/// Response from the videos endpoint with `part=statistics`
#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    statistics: Statistics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    /// The API encodes counts as strings
    view_count: Option<String>,
}

/// Extracts the video ID from a watch or short-link URL
pub fn extract_video_id(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?:youtube\.com/watch\?v=|youtu\.be/)([^&?#/]+)").expect("valid regex")
    });
    re.captures(url).map(|c| c[1].to_string())
}

/// Reads the view count through the official Data API
#[derive(Debug, Clone)]
pub struct YouTubeApiProvider {
    client: Client,
    api_key: String,
    video_id: String,
}

impl YouTubeApiProvider {
    pub fn new(client: Client, api_key: String, video_id: String) -> Self {
        Self {
            client,
            api_key,
            video_id,
        }
    }

    /// Parses the videos endpoint body into a view count
    fn parse_response(&self, text: &str) -> Result<u64, FetchError> {
        let response: VideosResponse =
            serde_json::from_str(text).map_err(|e| FetchError::Parse(e.to_string()))?;

        let item = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::NotFound(format!("video {}", self.video_id)))?;

        let raw = item
            .statistics
            .view_count
            .ok_or_else(|| FetchError::Parse("statistics.viewCount missing".to_string()))?;

        raw.parse()
            .map_err(|_| FetchError::Parse(format!("invalid viewCount '{}'", raw)))
    }
}

#[async_trait]
impl SourceProvider for YouTubeApiProvider {
    fn kind(&self) -> &'static str {
        "youtube-api"
    }

    async fn fetch(&self) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(YOUTUBE_API_URL)
            .query(&[
                ("part", "statistics"),
                ("id", self.video_id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        let text = check_status(response)?.text().await?;

        self.parse_response(&text)
    }
}

/// Reads the view count embedded in the watch page's player data
#[derive(Debug, Clone)]
pub struct YouTubePageProvider {
    client: Client,
    video_url: String,
}

impl YouTubePageProvider {
    pub fn new(client: Client, video_url: String) -> Self {
        Self { client, video_url }
    }
}

/// Finds `"viewCount":"<digits>"` in a watch page
fn parse_watch_page(html: &str) -> Result<u64, FetchError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#""viewCount"\s*:\s*"(\d+)""#).expect("valid regex"));

    let caps = re
        .captures(html)
        .ok_or_else(|| FetchError::Parse("viewCount not found in page".to_string()))?;
    caps[1]
        .parse()
        .map_err(|_| FetchError::Parse(format!("invalid viewCount '{}'", &caps[1])))
}

#[async_trait]
impl SourceProvider for YouTubePageProvider {
    fn kind(&self) -> &'static str {
        "youtube-page"
    }

    async fn fetch(&self) -> Result<u64, FetchError> {
        let response = self.client.get(&self.video_url).send().await?;
        let html = check_status(response)?.text().await?;

        parse_watch_page(&html)
    }
}
