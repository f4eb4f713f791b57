use crate::store::write_atomic;
use crate::types::{FeedError, Item, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The publishable fields of one item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub id: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attribution: Option<String>,
}

impl From<&Item> for SnapshotItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            link: item.link.clone(),
            description: item.description.clone(),
            attribution: item.attribution.clone(),
        }
    }
}

/// Last published item set per target, plus the ids of each archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub targets: BTreeMap<String, Vec<SnapshotItem>>,
    #[serde(default)]
    pub archives: BTreeMap<String, Vec<String>>,
}

impl Snapshot {
    pub fn record(&mut self, key: &str, items: &[Item]) {
        self.targets
            .insert(key.to_string(), items.iter().map(SnapshotItem::from).collect());
    }

    /// Archive membership only. Archived items are never refreshed.
    pub fn record_archive(&mut self, key: &str, items: &[Item]) {
        let mut ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        ids.sort();
        self.archives.insert(key.to_string(), ids);
    }

    fn archive_set(&self, key: &str) -> BTreeSet<&String> {
        self.archives
            .get(key)
            .map(|ids| ids.iter().collect())
            .unwrap_or_default()
    }

    fn logical_set(&self, key: &str) -> BTreeSet<&SnapshotItem> {
        self.targets
            .get(key)
            .map(|items| items.iter().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Changed,
    Unchanged,
}

impl ChangeStatus {
    pub fn is_changed(self) -> bool {
        self == ChangeStatus::Changed
    }
}

/// Keys whose active membership, displayed content or archive membership differs.
/// Order and timestamps are not content.
pub fn changed_targets(new_snapshot: &Snapshot, previous: &Snapshot) -> Vec<String> {
    let keys: BTreeSet<&String> = new_snapshot
        .targets
        .keys()
        .chain(previous.targets.keys())
        .chain(new_snapshot.archives.keys())
        .chain(previous.archives.keys())
        .collect();

    keys.into_iter()
        .filter(|key| {
            new_snapshot.logical_set(key) != previous.logical_set(key)
                || new_snapshot.archive_set(key) != previous.archive_set(key)
        })
        .cloned()
        .collect()
}

pub fn detect(new_snapshot: &Snapshot, previous: &Snapshot) -> ChangeStatus {
    if changed_targets(new_snapshot, previous).is_empty() {
        ChangeStatus::Unchanged
    } else {
        ChangeStatus::Changed
    }
}

/// Owns the persisted snapshot file.
pub struct ChangeDetector {
    path: PathBuf,
    previous: Snapshot,
}

impl ChangeDetector {
    /// Loads the previous snapshot. Missing or unreadable files count as empty.
    pub fn open(path: &Path) -> Self {
        let previous = match Self::read(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring snapshot: {}", e);
                Snapshot::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            previous,
        }
    }

    fn read(path: &Path) -> Result<Snapshot> {
        if !path.exists() {
            debug!("No snapshot at {}", path.display());
            return Ok(Snapshot::default());
        }
        let corrupt = |reason: String| FeedError::PersistedStateCorrupt {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))
    }

    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }

    /// Compares against the previous snapshot and, when something changed, replaces
    /// the persisted file atomically.
    pub fn commit(&mut self, mut next: Snapshot, now: DateTime<Utc>) -> Result<ChangeStatus> {
        let changed = changed_targets(&next, &self.previous);
        if changed.is_empty() {
            info!("No changes detected");
            return Ok(ChangeStatus::Unchanged);
        }

        info!("Changes detected in: {}", changed.join(", "));
        next.timestamp = Some(now);
        let json = serde_json::to_vec_pretty(&next)?;
        write_atomic(&self.path, &json)?;
        self.previous = next;
        Ok(ChangeStatus::Changed)
    }
}
