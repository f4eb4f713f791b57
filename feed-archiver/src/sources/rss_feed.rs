use crate::rss_utils::url::resolve_link;
use crate::traits::PullFeed;
use crate::types::{FeedError, LiveSourceSpec, RawRecord, Result};
use crate::{FeedParser, Fetcher};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// An external RSS or Atom feed contributing to an aggregated target.
pub struct RssFeedSource {
    spec: LiveSourceSpec,
    fetcher: Arc<Fetcher>,
}

impl RssFeedSource {
    pub fn new(spec: LiveSourceSpec, fetcher: Arc<Fetcher>) -> Self {
        Self { spec, fetcher }
    }
}

#[async_trait]
impl PullFeed for RssFeedSource {
    fn source_id(&self) -> String {
        format!("rss:{}", self.spec.uri)
    }

    fn source_name(&self) -> String {
        self.spec.label.clone().unwrap_or_else(|| {
            // Extract domain name from URL as fallback
            if let Ok(parsed) = url::Url::parse(&self.spec.uri) {
                if let Some(domain) = parsed.domain() {
                    return format!("RSS Feed ({})", domain);
                }
            }
            "RSS Feed".to_string()
        })
    }

    async fn pull(&self) -> Result<Vec<RawRecord>> {
        info!("Pulling RSS feed: {}", self.spec.uri);

        let fetch_result = self.fetcher.fetch_feed(&self.spec.uri).await?;

        if !FeedParser::is_valid_feed_content(&fetch_result.content) {
            warn!("Response from {} does not look like a feed", self.spec.uri);
            return Err(FeedError::source_unavailable(&self.spec.uri, "response is not a feed"));
        }

        let parsed = FeedParser::parse_feed(&fetch_result.content, self.spec.label.as_deref())
            .map_err(|e| FeedError::source_unavailable(&self.spec.uri, e))?;

        // Relative entry links belong to the upstream site, not to our target.
        let records: Vec<RawRecord> = parsed
            .entries
            .into_iter()
            .map(|mut entry| {
                entry.link = entry.link.map(|link| resolve_link(&fetch_result.url, &link));
                RawRecord::from(entry)
            })
            .collect();
        info!(
            "Pulled {} entries from {} in {}ms",
            records.len(),
            self.spec.uri,
            fetch_result.response_time_ms
        );
        Ok(records)
    }
}
