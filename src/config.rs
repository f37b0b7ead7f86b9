//! Configuration loading and startup validation
//!
//! Configuration is a TOML file listing the sources, their TTLs, fallback
//! constants and provider settings. Everything that could make the fallback
//! chain come up empty is rejected here, before any request is served.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheStore, FileStorage};
use crate::fallback::{ChainError, FallbackKind, FallbackPolicy};
use crate::sources::extract_track_id;

/// Environment variable consulted when a `youtube-api` source has no key
pub const YOUTUBE_API_KEY_ENV: &str = "YOUTUBE_API_KEY";

/// Longest TTL honored; larger values are clamped
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

/// Errors detected while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no sources configured")]
    NoSources,

    #[error("source id '{0}' is invalid (use ASCII letters, digits, '-' or '_')")]
    InvalidSourceId(String),

    #[error("source '{0}' is configured more than once")]
    DuplicateSource(String),

    #[error("source '{0}' has a zero TTL")]
    ZeroTtl(String),

    #[error("source '{source_id}' has an invalid fallback chain: {error}")]
    FallbackChain { source_id: String, error: ChainError },

    #[error("source '{source_id}' is missing provider setting '{field}'")]
    MissingProviderSetting { source_id: String, field: &'static str },

    #[error("source '{source_id}' has an invalid {field}: '{value}'")]
    InvalidProviderSetting {
        source_id: String,
        field: &'static str,
        value: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("could not determine a cache directory; set cache_dir")]
    NoCacheDir,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where cache entries are persisted; XDG cache dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Deadline for a single fetch attempt
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    pub sources: Vec<SourceConfig>,
}

/// Retry policy shared by every source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per refresh, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

/// One count source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Cache key and display name
    pub id: String,
    /// How long a cached value is served without refreshing
    pub ttl_seconds: u64,
    /// Last-known-good value used when nothing better is available
    pub hardcoded_fallback: u64,
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<FallbackKind>,
    pub provider: ProviderConfig,
}

/// How a source is fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderConfig {
    /// YouTube Data API v3; `video` is a watch URL or a bare video ID
    YoutubeApi {
        #[serde(default)]
        api_key: String,
        video: String,
    },
    /// Scrape the YouTube watch page
    YoutubePage { video_url: String },
    /// Scrape the Spotify track page
    SpotifyPage { track_url: String },
    /// Always return the same count
    Fixed { count: u64 },
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_fallback_chain() -> Vec<FallbackKind> {
    vec![
        FallbackKind::ManualOverride,
        FallbackKind::CachedStale,
        FallbackKind::HardcodedConstant,
    ]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            retry: RetryConfig::default(),
            sources: vec![
                SourceConfig {
                    id: "spotify".to_string(),
                    ttl_seconds: 3600,
                    hardcoded_fallback: 1_350_186,
                    fallback_chain: default_fallback_chain(),
                    provider: ProviderConfig::SpotifyPage {
                        track_url: "https://open.spotify.com/intl-fr/track/0QSFpVVi5h1TrYG69WMTg7"
                            .to_string(),
                    },
                },
                SourceConfig {
                    id: "youtube".to_string(),
                    ttl_seconds: 300,
                    hardcoded_fallback: 1_420_000,
                    fallback_chain: default_fallback_chain(),
                    provider: ProviderConfig::YoutubePage {
                        video_url: "https://www.youtube.com/watch?v=Mo2HToQ3-S4".to_string(),
                    },
                },
            ],
        }
    }
}

impl Config {
    /// Default config file location, `~/.config/playcount/config.toml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "playcount").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads and validates configuration
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// tried and the built-in defaults are used if nothing is there.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::read_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration without validating it
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Fills credentials left empty in the file from the environment
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for source in &mut self.sources {
            if let ProviderConfig::YoutubeApi { api_key, .. } = &mut source.provider {
                if api_key.is_empty() {
                    if let Some(key) = lookup(YOUTUBE_API_KEY_ENV) {
                        *api_key = key;
                    }
                }
            }
        }
    }

    /// Checks everything that would otherwise fail at request time
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Zero("fetch_timeout_secs"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("retry.max_attempts"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !is_valid_id(&source.id) {
                return Err(ConfigError::InvalidSourceId(source.id.clone()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
            if source.ttl_seconds == 0 {
                return Err(ConfigError::ZeroTtl(source.id.clone()));
            }
            source.fallback_policy()?;
            source.provider.check(&source.id)?;
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Opens the cache store at the configured or default location
    pub fn cache_store(&self) -> Result<CacheStore, ConfigError> {
        let storage = match &self.cache_dir {
            Some(dir) => FileStorage::with_dir(dir.clone()),
            None => FileStorage::new().ok_or(ConfigError::NoCacheDir)?,
        };
        Ok(CacheStore::new(std::sync::Arc::new(storage)))
    }
}

impl SourceConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds.min(MAX_TTL_SECS) as i64)
    }

    pub fn fallback_policy(&self) -> Result<FallbackPolicy, ConfigError> {
        FallbackPolicy::new(self.fallback_chain.clone(), self.hardcoded_fallback).map_err(|error| {
            ConfigError::FallbackChain {
                source_id: self.id.clone(),
                error,
            }
        })
    }
}

impl ProviderConfig {
    fn check(&self, source_id: &str) -> Result<(), ConfigError> {
        let missing = |field| ConfigError::MissingProviderSetting {
            source_id: source_id.to_string(),
            field,
        };
        match self {
            ProviderConfig::YoutubeApi { api_key, video } => {
                if api_key.trim().is_empty() {
                    return Err(missing("api_key"));
                }
                if video.trim().is_empty() {
                    return Err(missing("video"));
                }
            }
            ProviderConfig::YoutubePage { video_url } if video_url.trim().is_empty() => {
                return Err(missing("video_url"));
            }
            ProviderConfig::SpotifyPage { track_url } => {
                if track_url.trim().is_empty() {
                    return Err(missing("track_url"));
                }
                if extract_track_id(track_url).is_none() {
                    return Err(ConfigError::InvalidProviderSetting {
                        source_id: source_id.to_string(),
                        field: "track_url",
                        value: track_url.clone(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Source ids double as file names in the cache directory
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
