use crate::types::{EntryRecord, FeedError, ParsedFeed, Result};
use feed_rs::parser;
use tracing::{debug, info};

pub struct FeedParser;

impl FeedParser {
    /// Parses RSS or Atom content into loosely typed entry records. `source_label`
    /// overrides the feed's own title as the attribution of every entry.
    pub fn parse_feed(content: &str, source_label: Option<&str>) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| FeedError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content).filter(|t| !t.trim().is_empty());
        let description = feed.description.map(|d| d.content);
        let label = source_label.map(str::to_string).or_else(|| title.clone());

        let entries: Vec<EntryRecord> = feed
            .entries
            .into_iter()
            .map(|entry| Self::parse_entry(entry, label.clone()))
            .collect();

        info!("Parsed feed with {} entries", entries.len());

        Ok(ParsedFeed {
            title,
            description,
            entries,
        })
    }

    fn parse_entry(entry: feed_rs::model::Entry, source_label: Option<String>) -> EntryRecord {
        let link = Self::select_entry_link(&entry);

        // Prefer the summary, fall back to full content
        let description = entry
            .summary
            .map(|s| s.content)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| entry.content.and_then(|c| c.body));

        EntryRecord {
            title: entry.title.map(|t| t.content),
            link,
            description,
            published: entry.published,
            updated: entry.updated,
            source_label,
        }
    }

    fn select_entry_link(entry: &feed_rs::model::Entry) -> Option<String> {
        let alternate = entry.links.iter().find(|link| {
            let rel = link.rel.as_deref().unwrap_or("");
            !link.href.trim().is_empty() && (rel.is_empty() || rel.eq_ignore_ascii_case("alternate"))
        });
        if let Some(link) = alternate.or_else(|| entry.links.iter().find(|l| !l.href.trim().is_empty())) {
            return Some(link.href.trim().to_string());
        }

        let id = entry.id.trim();
        if id.starts_with("http://") || id.starts_with("https://") {
            return Some(id.to_string());
        }
        None
    }

    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();
        content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("<rdf:rdf")
            || content_lower.contains("<channel")
    }
}
