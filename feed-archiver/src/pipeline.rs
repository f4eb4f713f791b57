use crate::assembler;
use crate::change_detector::{self, ChangeDetector, ChangeStatus};
use crate::config::{AppConfig, FeedTarget, RejectedTarget};
use crate::fingerprint;
use crate::normalizer::Normalizer;
use crate::retention;
use crate::sources::{RssFeedSource, TableRowsSource};
use crate::store;
use crate::traits::PullFeed;
use crate::types::{FeedError, Item, RawRecord, Result};
use crate::Fetcher;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Counters for one processed target.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetReport {
    pub key: String,
    pub sources: usize,
    pub sources_failed: usize,
    pub records: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub added: usize,
    pub refreshed: usize,
    pub active: usize,
    pub archived: usize,
    pub newly_archived: usize,
    pub dropped: usize,
    pub already_retired: usize,
    pub prior_state_warnings: Vec<String>,
}

/// A target whose output could not be produced this run.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTarget {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub targets: Vec<TargetReport>,
    pub rejected: Vec<RejectedTarget>,
    pub failed: Vec<FailedTarget>,
    pub changed: ChangeStatus,
    pub changed_targets: Vec<String>,
    pub snapshot_error: Option<String>,
}

/// Result of processing one target: its report plus both published sets.
#[derive(Debug)]
pub struct TargetOutcome {
    pub report: TargetReport,
    pub active: Vec<Item>,
    pub archive: Vec<Item>,
}

/// Runs every configured target once, sequentially, then updates the snapshot.
pub struct FeedPipeline {
    config: Arc<AppConfig>,
    fetcher: Arc<Fetcher>,
}

impl FeedPipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
        Ok(Self {
            config: Arc::new(config),
            fetcher,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Builds the sources a target draws from: the table scrape first, then external
    /// feeds in configured order.
    pub fn sources_for(&self, target: &FeedTarget) -> Vec<Box<dyn PullFeed>> {
        let mut sources: Vec<Box<dyn PullFeed>> = Vec::new();
        if let Some(table) = &target.table {
            sources.push(Box::new(TableRowsSource::new(table.rows_path.clone())));
        }
        for spec in &target.sources {
            sources.push(Box::new(RssFeedSource::new(spec.clone(), self.fetcher.clone())));
        }
        sources
    }

    pub async fn run(&self, now: DateTime<Utc>) -> RunReport {
        info!("Starting run over {} targets", self.config.targets.len());

        let mut detector = ChangeDetector::open(&self.config.snapshot_path);
        let mut next_snapshot = detector.previous().clone();

        // Entries of targets that no longer exist in the configuration are forgotten.
        let configured: HashSet<&str> = self
            .config
            .targets
            .iter()
            .map(|t| t.key.as_str())
            .chain(self.config.rejected.iter().map(|r| r.target.as_str()))
            .collect();
        next_snapshot
            .targets
            .retain(|key, _| configured.contains(key.as_str()));
        next_snapshot
            .archives
            .retain(|key, _| configured.contains(key.as_str()));

        let mut reports = Vec::new();
        let mut failed = Vec::new();

        for target in &self.config.targets {
            let sources = self.sources_for(target);
            match self.process_target(target, sources, now).await {
                Ok(outcome) => {
                    next_snapshot.record(&target.key, &outcome.active);
                    next_snapshot.record_archive(&target.key, &outcome.archive);
                    reports.push(outcome.report);
                }
                Err(e) => {
                    error!(target_key = %target.key, "Target failed: {}", e);
                    failed.push(FailedTarget {
                        key: target.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let changed_targets = change_detector::changed_targets(&next_snapshot, detector.previous());
        let (changed, snapshot_error) = match detector.commit(next_snapshot, now) {
            Ok(status) => (status, None),
            Err(e) => {
                error!("Failed to persist snapshot: {}", e);
                let status = if changed_targets.is_empty() {
                    ChangeStatus::Unchanged
                } else {
                    ChangeStatus::Changed
                };
                (status, Some(e.to_string()))
            }
        };

        info!(
            "Run finished: {} targets written, {} failed, {} rejected, changed={}",
            reports.len(),
            failed.len(),
            self.config.rejected.len(),
            changed.is_changed()
        );

        RunReport {
            started_at: now,
            targets: reports,
            rejected: self.config.rejected.clone(),
            failed,
            changed,
            changed_targets,
            snapshot_error,
        }
    }

    /// Merges the target's sources into its active and archive feeds and writes both.
    /// Only a failed write (or render) is returned as an error.
    pub async fn process_target(
        &self,
        target: &FeedTarget,
        sources: Vec<Box<dyn PullFeed>>,
        now: DateTime<Utc>,
    ) -> Result<TargetOutcome> {
        info!(target_key = %target.key, "Processing target with {} sources", sources.len());

        let mut report = TargetReport {
            key: target.key.clone(),
            sources: sources.len(),
            ..Default::default()
        };

        let (records, sources_failed) = self.collect_batch(target, &sources).await;
        report.sources_failed = sources_failed;
        report.records = records.len();

        let normalized = Normalizer::new(target, now).normalize_all(records);
        report.malformed = normalized.malformed;
        let unique = fingerprint::deduplicate(normalized.items);
        report.duplicates = report.records - report.malformed - unique.len();

        let (prior, warnings) = store::load_prior_state(target);
        report.prior_state_warnings = warnings.iter().map(|e| e.to_string()).collect();
        let retired_before = prior.retired.len();

        let outcome = retention::apply(
            prior,
            unique,
            target.active_limits(),
            target.archive_limits(),
            now,
        );

        let active_xml = assembler::assemble(&outcome.active, target, now)?;
        let archive_xml = assembler::assemble_archive(&outcome.archive, target, now)?;

        // Ledger first, then archive: a dropped id must be remembered before it leaves
        // the archive, and an item evicted from active must already be archived.
        if outcome.retired.len() != retired_before {
            store::write_retired(&store::retired_ledger_path(&target.archive_path), &outcome.retired)?;
        }
        store::write_atomic(&target.archive_path, &archive_xml)?;
        store::write_atomic(&target.output_path, &active_xml)?;

        report.added = outcome.added;
        report.refreshed = outcome.refreshed;
        report.active = outcome.active.len();
        report.archived = outcome.archive.len();
        report.newly_archived = outcome.newly_archived;
        report.dropped = outcome.dropped;
        report.already_retired = outcome.already_retired;

        info!(
            target_key = %target.key,
            "Wrote {} ({} items) and {} ({} items)",
            target.output_path.display(),
            report.active,
            target.archive_path.display(),
            report.archived
        );

        Ok(TargetOutcome {
            report,
            active: outcome.active,
            archive: outcome.archive,
        })
    }

    /// Upper bound on one source pull, covering every retry.
    fn source_deadline(&self) -> Duration {
        let fetch = self.fetcher.config();
        let attempts = u64::from(fetch.max_retries) + 1;
        Duration::from_secs(fetch.timeout_seconds * attempts + fetch.retry_delay_seconds * 60)
    }

    /// Pulls all sources concurrently. Failed sources contribute nothing; records keep
    /// the configured source order so first-observed-wins is deterministic.
    async fn collect_batch(
        &self,
        target: &FeedTarget,
        sources: &[Box<dyn PullFeed>],
    ) -> (Vec<RawRecord>, usize) {
        let limit = self.fetcher.config().max_concurrency.max(1);
        let deadline = self.source_deadline();

        let mut results: Vec<(usize, String, Result<Vec<RawRecord>>)> = stream::iter(sources.iter().enumerate())
            .map(|(index, source)| async move {
                let pulled = match tokio::time::timeout(deadline, source.pull()).await {
                    Ok(result) => result,
                    Err(_) => Err(FeedError::source_unavailable(source.source_id(), "timed out")),
                };
                (index, source.source_name(), pulled)
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut records = Vec::new();
        let mut failed = 0;
        for (_, name, result) in results {
            match result {
                Ok(mut pulled) => records.append(&mut pulled),
                Err(e) => {
                    warn!(target_key = %target.key, source = %name, "Source skipped this run: {}", e);
                    failed += 1;
                }
            }
        }
        (records, failed)
    }
}
