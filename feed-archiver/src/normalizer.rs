use crate::config::FeedTarget;
use crate::fingerprint;
use crate::rss_utils::{text, time, url as url_utils};
use crate::types::{EntryRecord, FeedError, Item, RawRecord, Result, TableCell, TableRow};
use chrono::{DateTime, SubsecRound, Utc};
use tracing::debug;

/// Separator between the cells that make up a table row's title.
pub const TITLE_SEPARATOR: &str = " | ";
const TITLE_CELLS: usize = 3;
const UNTITLED_FALLBACK_CHARS: usize = 80;

/// Rating cell values and the marker token appended to the title.
pub const RATING_MARKERS: &[(&str, &str)] = &[
    ("essential", "[!]"),
    ("important", "[*]"),
    ("optional", "[~]"),
];

pub fn rating_marker(rating: &str) -> Option<&'static str> {
    let rating = rating.trim().to_ascii_lowercase();
    RATING_MARKERS
        .iter()
        .find(|(name, _)| *name == rating)
        .map(|(_, marker)| *marker)
}

/// Result of normalizing one batch of raw records.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub items: Vec<Item>,
    pub malformed: usize,
}

/// Converts raw records into canonical items for one target.
pub struct Normalizer<'a> {
    target: &'a FeedTarget,
    now: DateTime<Utc>,
}

impl<'a> Normalizer<'a> {
    /// `now` is the ingestion time given to records that carry no timestamp. It is
    /// truncated to whole seconds so it survives the RSS round-trip.
    pub fn new(target: &'a FeedTarget, now: DateTime<Utc>) -> Self {
        Self {
            target,
            now: now.trunc_subsecs(0),
        }
    }

    pub fn normalize_all(&self, records: Vec<RawRecord>) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for record in records {
            match self.normalize(record) {
                Ok(item) => batch.items.push(item),
                Err(e) => {
                    debug!(target_key = %self.target.key, "Skipping record: {}", e);
                    batch.malformed += 1;
                }
            }
        }
        batch
    }

    pub fn normalize(&self, record: RawRecord) -> Result<Item> {
        match record {
            RawRecord::TableRow(row) => self.from_table_row(row),
            RawRecord::FeedEntry(entry) => self.from_entry(entry),
        }
    }

    fn from_table_row(&self, row: TableRow) -> Result<Item> {
        let date_column = self.target.table.as_ref().and_then(|t| t.date_column);
        let rating_column = self.target.table.as_ref().and_then(|t| t.rating_column);

        let mut published_at = None;
        let mut marker = None;
        let mut content_cells: Vec<&TableCell> = Vec::new();

        for (index, cell) in row.cells.iter().enumerate() {
            if Some(index) == date_column {
                published_at = time::parse_loose_date(&cell.text);
            } else if Some(index) == rating_column {
                marker = rating_marker(&cell.text);
            } else if cell.has_content() {
                content_cells.push(cell);
            }
        }

        let text_cells: Vec<&TableCell> = content_cells
            .iter()
            .copied()
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        if text_cells.is_empty() {
            return Err(FeedError::MalformedRecord("table row has no usable text".to_string()));
        }

        let split = text_cells.len().min(TITLE_CELLS);
        let (title_cells, rest) = text_cells.split_at(split);

        let mut title = title_cells
            .iter()
            .map(|c| text::collapse_whitespace(&c.text))
            .collect::<Vec<_>>()
            .join(TITLE_SEPARATOR);
        if let Some(marker) = marker {
            title.push(' ');
            title.push_str(marker);
        }

        let description = rest
            .iter()
            .map(|c| text::collapse_whitespace(&c.text))
            .collect::<Vec<_>>()
            .join(TITLE_SEPARATOR);

        // Prefer a link from the title cells, then any other content cell.
        let link = title_cells
            .iter()
            .chain(content_cells.iter())
            .flat_map(|c| c.links.iter())
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(|l| self.absolutize(l));

        self.finish(title, link, description, published_at, None)
    }

    fn from_entry(&self, entry: EntryRecord) -> Result<Item> {
        let description = entry
            .description
            .as_deref()
            .map(text::extract_text_from_html)
            .unwrap_or_default();

        let title = entry
            .title
            .as_deref()
            .map(text::extract_text_from_html)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                (!description.is_empty())
                    .then(|| text::smart_truncate(&description, UNTITLED_FALLBACK_CHARS))
            })
            .ok_or_else(|| FeedError::MalformedRecord("feed entry has no title".to_string()))?;

        let link = entry
            .link
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| self.absolutize(l));

        // `published` is stable across edits, `updated` is not.
        let published_at = entry.published.or(entry.updated);

        let attribution = entry
            .source_label
            .map(|label| text::collapse_whitespace(&label))
            .filter(|label| !label.is_empty());

        self.finish(title, link, description, published_at, attribution)
    }

    fn finish(
        &self,
        title: String,
        link: Option<String>,
        description: String,
        published_at: Option<DateTime<Utc>>,
        attribution: Option<String>,
    ) -> Result<Item> {
        if let Some(link) = link.as_deref() {
            if url_utils::is_excluded_domain(link, &self.target.exclude_domains) {
                return Err(FeedError::MalformedRecord(format!("excluded domain: {}", link)));
            }
        }

        let description = match self.target.max_description_length {
            Some(max) => text::smart_truncate(&description, max),
            None => description,
        };

        let key = &self.target.key;
        let id = fingerprint::identity(link.as_deref(), &title, key);
        let link = link.unwrap_or_else(|| fingerprint::placeholder_link(&self.target.link, &title, key));

        Ok(Item {
            id,
            title,
            link,
            description,
            published_at: published_at.unwrap_or(self.now),
            source_key: key.clone(),
            attribution,
        })
    }

    /// Resolves links still relative (scraped table cells) against the target's site link.
    fn absolutize(&self, link: &str) -> String {
        url_utils::resolve_link(&self.target.link, link)
    }
}
