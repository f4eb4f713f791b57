use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
pub use interfaces::defs::{EntryRecord, LiveSourceSpec, RawRecord, TableCell, TableRow};

/// One syndication entry after normalization.
///
/// `published_at` is fixed at first observation and only read afterwards, for ordering
/// and the retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub source_key: String,
    pub attribution: Option<String>,
}

impl Item {
    /// Newest first, ties broken by id ascending.
    pub fn publication_order(a: &Item, b: &Item) -> std::cmp::Ordering {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Takes display fields from a fresher observation of the same item.
    pub fn refresh_from(&mut self, newer: &Item) {
        self.title = newer.title.clone();
        self.link = newer.link.clone();
        self.description = newer.description.clone();
        self.attribution = newer.attribution.clone();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    pub max_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Feed-Archiver/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            max_redirects: 5,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub http_status: u16,
    pub response_time_ms: u64,
    pub content: String,
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub entries: Vec<EntryRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Source unavailable: {source_uri}: {reason}")]
    SourceUnavailable { source_uri: String, reason: String },

    #[error("Persisted state corrupt: {path}: {reason}")]
    PersistedStateCorrupt { path: String, reason: String },

    #[error("Invalid configuration for {target}: {reason}")]
    ConfigInvalid { target: String, reason: String },

    #[error("Failed to write {path}: {reason}")]
    WriteFailure { path: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FeedError {
    pub fn source_unavailable(source_uri: impl Into<String>, reason: impl ToString) -> Self {
        FeedError::SourceUnavailable {
            source_uri: source_uri.into(),
            reason: reason.to_string(),
        }
    }

    /// Only a failed output write stops a target's pipeline.
    pub fn is_fatal_for_target(&self) -> bool {
        matches!(self, FeedError::WriteFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
