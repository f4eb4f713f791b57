use crate::assembler::{self, ATTRIBUTION_DOMAIN};
use crate::config::{AttributionPolicy, FeedTarget};
use crate::fingerprint;
use crate::retention::PriorState;
use crate::rss_utils::time::parse_loose_date;
use crate::types::{FeedError, Item, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    guid: Option<RssText>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<RssCategory>,
}

#[derive(Debug, Deserialize)]
struct RssText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RssCategory {
    #[serde(rename = "@domain", default)]
    domain: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

/// Ids dropped past a target's archive limits, kept next to the archive file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RetiredLedger {
    #[serde(default)]
    ids: BTreeSet<String>,
}

/// `feed_archive.xml` -> `feed_archive.retired.json`
pub fn retired_ledger_path(archive_path: &Path) -> PathBuf {
    archive_path.with_extension("retired.json")
}

/// Reads the active and archive feeds written by the previous run, plus the retired
/// ledger. A missing file is a cold start; an unreadable one is reported and also
/// treated as empty.
pub fn load_prior_state(target: &FeedTarget) -> (PriorState, Vec<FeedError>) {
    let mut warnings = Vec::new();
    let mut ignore = |path: &Path, e: FeedError| {
        warn!(target_key = %target.key, "Ignoring prior state: {}", e);
        preserve_corrupt_file(path);
        warnings.push(e);
    };

    let mut load = |path: &Path| match load_feed_items(path, target) {
        Ok(items) => items,
        Err(e) => {
            ignore(path, e);
            Vec::new()
        }
    };
    let active = load(&target.output_path);
    let archive = load(&target.archive_path);

    let ledger_path = retired_ledger_path(&target.archive_path);
    let retired = match load_retired(&ledger_path) {
        Ok(ids) => ids,
        Err(e) => {
            ignore(&ledger_path, e);
            BTreeSet::new()
        }
    };

    (PriorState { active, archive, retired }, warnings)
}

pub fn load_retired(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let corrupt = |reason: String| FeedError::PersistedStateCorrupt {
        path: path.display().to_string(),
        reason,
    };
    let raw = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    let ledger: RetiredLedger = serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;
    Ok(ledger.ids)
}

pub fn write_retired(path: &Path, ids: &BTreeSet<String>) -> Result<()> {
    let ledger = RetiredLedger { ids: ids.clone() };
    write_atomic(path, &serde_json::to_vec_pretty(&ledger)?)
}

pub fn load_feed_items(path: &Path, target: &FeedTarget) -> Result<Vec<Item>> {
    if !path.exists() {
        info!("No prior feed at {}, starting cold", path.display());
        return Ok(Vec::new());
    }

    let corrupt = |reason: String| FeedError::PersistedStateCorrupt {
        path: path.display().to_string(),
        reason,
    };

    let raw = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    let document: RssDocument = quick_xml::de::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;

    let items: Vec<Item> = document
        .channel
        .items
        .into_iter()
        .filter_map(|entry| item_from_rss(entry, target))
        .collect();

    debug!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}

fn item_from_rss(entry: RssItem, target: &FeedTarget) -> Option<Item> {
    let attribution = entry
        .categories
        .into_iter()
        .find(|c| c.domain.as_deref() == Some(ATTRIBUTION_DOMAIN))
        .map(|c| c.value.trim().to_string())
        .filter(|v| !v.is_empty());

    let mut title = entry.title.unwrap_or_default().trim().to_string();
    let mut description = entry.description.unwrap_or_default().trim().to_string();
    if let Some(attr) = attribution.as_deref() {
        match target.source_attribution {
            AttributionPolicy::Title => title = assembler::strip_decoration(&title, attr),
            AttributionPolicy::Description => {
                description = assembler::strip_decoration(&description, attr)
            }
            AttributionPolicy::None => {}
        }
    }
    if title.is_empty() {
        debug!("Skipping persisted item without title");
        return None;
    }

    let link = entry
        .link
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| fingerprint::placeholder_link(&target.link, &title, &target.key));

    let id = entry
        .guid
        .map(|g| g.value.trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| fingerprint::identity(Some(&link), &title, &target.key));

    let published_at = match entry.pub_date.as_deref().and_then(parse_loose_date) {
        Some(ts) => ts,
        None => {
            warn!("Persisted item {} has no readable pubDate, treating as oldest", id);
            DateTime::<Utc>::UNIX_EPOCH
        }
    };

    Some(Item {
        id,
        title,
        link,
        description,
        published_at,
        source_key: target.key.clone(),
        attribution,
    })
}

/// Keeps a copy of an unreadable file next to it before it gets replaced.
fn preserve_corrupt_file(path: &Path) {
    if !path.exists() {
        return;
    }
    let mut backup = path.as_os_str().to_owned();
    backup.push(".corrupt");
    if let Err(e) = fs::copy(path, &backup) {
        warn!("Could not back up {}: {}", path.display(), e);
    }
}

/// A temp file in the destination directory. Removed on drop unless committed.
struct PendingFile {
    tmp_path: PathBuf,
    committed: bool,
}

impl PendingFile {
    fn create(dest: &Path) -> std::io::Result<(Self, File)> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let tmp_path = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));
        let file = File::create(&tmp_path)?;
        Ok((Self { tmp_path, committed: false }, file))
    }

    fn commit(mut self, dest: &Path) -> std::io::Result<()> {
        fs::rename(&self.tmp_path, dest)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Replaces `path` with `bytes` so readers see either the old or the new file, never
/// a partial one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let write = || -> std::io::Result<()> {
        let (pending, mut file) = PendingFile::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        pending.commit(path)
    };

    write().map_err(|e| FeedError::WriteFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
