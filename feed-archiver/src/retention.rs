use crate::fingerprint::{self, DedupIndex};
use crate::types::Item;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Bounds on a collection. `None` means that rule does not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionLimits {
    pub max_items: Option<usize>,
    pub retention_days: Option<u32>,
}

impl RetentionLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_items.is_none() && self.retention_days.is_none()
    }

    fn is_too_old(&self, item: &Item, now: DateTime<Utc>) -> bool {
        match self.retention_days {
            Some(days) => now.signed_duration_since(item.published_at) > Duration::days(i64::from(days)),
            None => false,
        }
    }

    /// Sorts into publication order and splits into (kept, evicted). An item is
    /// evicted when it is past the age cutoff or ranks beyond `max_items`.
    pub fn partition(&self, mut items: Vec<Item>, now: DateTime<Utc>) -> (Vec<Item>, Vec<Item>) {
        items.sort_by(Item::publication_order);
        if self.is_unbounded() {
            return (items, Vec::new());
        }

        let mut kept = Vec::with_capacity(items.len());
        let mut evicted = Vec::new();
        for (rank, item) in items.into_iter().enumerate() {
            let over_cap = self.max_items.is_some_and(|max| rank >= max);
            if over_cap || self.is_too_old(&item, now) {
                evicted.push(item);
            } else {
                kept.push(item);
            }
        }
        (kept, evicted)
    }
}

/// What was persisted for a target by the previous run.
#[derive(Debug, Clone, Default)]
pub struct PriorState {
    pub active: Vec<Item>,
    pub archive: Vec<Item>,
    /// Ids dropped past the archive limits. They are never ingested again.
    pub retired: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RetentionOutcome {
    /// Publication order, newest first.
    pub active: Vec<Item>,
    /// Publication order, newest first.
    pub archive: Vec<Item>,
    pub added: usize,
    pub refreshed: usize,
    pub newly_archived: usize,
    pub dropped: usize,
    /// Batch items already archived in an earlier run and left there.
    pub already_archived: usize,
    /// Batch items dropped from the archive in an earlier run and ignored.
    pub already_retired: usize,
    /// Prior retired ids plus everything dropped this run.
    pub retired: BTreeSet<String>,
}

/// Merges a deduplicated batch into the prior state and applies both retention
/// policies.
///
/// Items seen before keep their original `published_at` but take the batch's display
/// fields. Items missing from the batch stay active until age or count evicts them, so
/// an empty batch never empties a feed. Archived and retired items never return to the
/// active set.
pub fn apply(
    prior: PriorState,
    batch: Vec<Item>,
    active_limits: RetentionLimits,
    archive_limits: RetentionLimits,
    now: DateTime<Utc>,
) -> RetentionOutcome {
    let mut outcome = RetentionOutcome::default();
    let mut retired = prior.retired;

    let mut archive = fingerprint::deduplicate(prior.archive);
    let mut archived = DedupIndex::from_items(&archive);

    // An id present in both files means the last run stopped between the two writes;
    // the archive copy wins.
    let mut merged: Vec<Item> = fingerprint::deduplicate(prior.active)
        .into_iter()
        .filter(|item| !archived.contains(&item.id))
        .collect();
    let mut positions: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(idx, item)| (item.id.clone(), idx))
        .collect();

    for item in batch {
        if let Some(&idx) = positions.get(&item.id) {
            merged[idx].refresh_from(&item);
            outcome.refreshed += 1;
        } else if archived.contains(&item.id) {
            debug!("Item {} already archived, not re-activating", item.id);
            outcome.already_archived += 1;
        } else if retired.contains(&item.id) {
            debug!("Item {} was dropped from the archive, ignoring", item.id);
            outcome.already_retired += 1;
        } else {
            positions.insert(item.id.clone(), merged.len());
            merged.push(item);
            outcome.added += 1;
        }
    }

    let (active, evicted) = active_limits.partition(merged, now);

    for item in evicted {
        if archived.insert(&item.id) {
            archive.push(item);
            outcome.newly_archived += 1;
        }
    }

    let (archive, dropped) = archive_limits.partition(archive, now);
    outcome.dropped = dropped.len();
    retired.extend(dropped.into_iter().map(|item| item.id));
    outcome.active = active;
    outcome.archive = archive;
    outcome.retired = retired;

    info!(
        "Retention: {} active, {} archived ({} new, {} dropped), {} added, {} refreshed",
        outcome.active.len(),
        outcome.archive.len(),
        outcome.newly_archived,
        outcome.dropped,
        outcome.added,
        outcome.refreshed
    );

    outcome
}
