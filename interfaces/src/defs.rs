use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upstream source a feed target draws from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSourceSpec {
    pub uri: String,
    /// Human-readable name used for attribution. Falls back to the feed's own title.
    #[serde(default)]
    pub label: Option<String>,
}

/// A single cell of a scraped table row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub links: Vec<String>,
}

impl TableCell {
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || self.links.iter().any(|l| !l.trim().is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

/// A loosely typed entry from an external RSS/Atom feed. Every field may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_label: Option<String>,
}

/// What the scraping and fetching collaborators hand over. Both variants converge
/// into one canonical item during normalization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawRecord {
    TableRow(TableRow),
    FeedEntry(EntryRecord),
}

impl From<TableRow> for RawRecord {
    fn from(row: TableRow) -> Self {
        RawRecord::TableRow(row)
    }
}

impl From<EntryRecord> for RawRecord {
    fn from(entry: EntryRecord) -> Self {
        RawRecord::FeedEntry(entry)
    }
}

// Object style note:
// Collaborators (browser scraper, HTTP fetchers) run inside the same short lived
// process as the engine. They produce `RawRecord`s and never see the canonical item
// type; everything past this boundary is owned by the engine.
