use crate::retention::RetentionLimits;
use crate::types::{FeedError, FetchConfig, LiveSourceSpec, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_SNAPSHOT_FILE: &str = "previous_data.json";

/// Where attribution of an aggregated item's upstream source is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionPolicy {
    Title,
    Description,
    #[default]
    None,
}

impl AttributionPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "title" => Some(Self::Title),
            "description" => Some(Self::Description),
            "none" | "" => Some(Self::None),
            _ => None,
        }
    }
}

/// The table scrape that feeds the primary target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// JSON rows file written by the scraper.
    pub rows_path: PathBuf,
    pub date_column: Option<usize>,
    pub rating_column: Option<usize>,
}

/// One independently configured output feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTarget {
    pub key: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub output_path: PathBuf,
    pub archive_path: PathBuf,
    pub max_items: Option<usize>,
    pub retention_days: Option<u32>,
    pub archive_max_items: Option<usize>,
    pub archive_retention_days: Option<u32>,
    pub source_attribution: AttributionPolicy,
    pub sources: Vec<LiveSourceSpec>,
    pub table: Option<TableSpec>,
    pub exclude_domains: Vec<String>,
    pub max_description_length: Option<usize>,
}

impl FeedTarget {
    pub fn active_limits(&self) -> RetentionLimits {
        RetentionLimits {
            max_items: self.max_items,
            retention_days: self.retention_days,
        }
    }

    pub fn archive_limits(&self) -> RetentionLimits {
        RetentionLimits {
            max_items: self.archive_max_items,
            retention_days: self.archive_retention_days,
        }
    }
}

/// A target that failed validation and is skipped for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedTarget {
    pub target: String,
    pub reason: String,
}

impl From<RejectedTarget> for FeedError {
    fn from(rejected: RejectedTarget) -> Self {
        FeedError::ConfigInvalid {
            target: rejected.target,
            reason: rejected.reason,
        }
    }
}

/// `feeds:` accepts either one mapping or a list of mappings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TargetsShape {
    Many(Vec<serde_yaml::Value>),
    Single(serde_yaml::Value),
}

impl TargetsShape {
    fn into_entries(self) -> Vec<serde_yaml::Value> {
        match self {
            TargetsShape::Many(entries) => entries,
            TargetsShape::Single(entry) => vec![entry],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default, alias = "aggregated_feeds")]
    feeds: Option<TargetsShape>,
    #[serde(default)]
    fetch: FetchConfig,
    #[serde(default)]
    snapshot: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    key: Option<String>,
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    output: Option<String>,
    archive: Option<String>,
    max_items: Option<usize>,
    retention_days: Option<u32>,
    archive_max_items: Option<usize>,
    archive_retention_days: Option<u32>,
    source_attribution: Option<String>,
    #[serde(default)]
    sources: Option<SourcesShape>,
    table: Option<RawTable>,
    enabled: Option<bool>,
    #[serde(default)]
    exclude_domains: Vec<String>,
    max_description_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourcesShape {
    Many(Vec<RawSource>),
    One(RawSource),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    rows: String,
    date_column: Option<usize>,
    rating_column: Option<usize>,
}

/// Immutable run configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub targets: Vec<FeedTarget>,
    pub rejected: Vec<RejectedTarget>,
    pub fetch: FetchConfig,
    pub snapshot_path: PathBuf,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| FeedError::ConfigInvalid {
            target: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_str(&raw, base_dir)
    }

    /// Parses a YAML document. Relative paths resolve against `base_dir`.
    pub fn from_yaml_str(raw: &str, base_dir: &Path) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(raw).map_err(|e| FeedError::ConfigInvalid {
            target: "<config>".to_string(),
            reason: e.to_string(),
        })?;

        let (targets, rejected) = match file.feeds {
            Some(shape) => normalize_targets(shape, base_dir),
            None => {
                warn!("Configuration declares no feeds");
                (Vec::new(), Vec::new())
            }
        };

        let snapshot_path = resolve_path(
            base_dir,
            file.snapshot.as_deref().unwrap_or(DEFAULT_SNAPSHOT_FILE),
        );

        info!(
            "Loaded configuration: {} targets, {} rejected",
            targets.len(),
            rejected.len()
        );

        Ok(Self {
            targets,
            rejected,
            fetch: file.fetch,
            snapshot_path,
        })
    }
}

/// Resolves either config shape into the canonical target list. Entries that fail
/// validation are returned separately and never abort the others.
pub fn normalize_targets(
    shape: TargetsShape,
    base_dir: &Path,
) -> (Vec<FeedTarget>, Vec<RejectedTarget>) {
    let mut targets: Vec<FeedTarget> = Vec::new();
    let mut rejected = Vec::new();
    let mut seen_keys = HashSet::new();
    let mut seen_outputs = HashSet::new();

    for (index, value) in shape.into_entries().into_iter().enumerate() {
        let label = value
            .get("key")
            .and_then(|k| k.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("feeds[{}]", index));

        let raw: RawTarget = match serde_yaml::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(target_key = %label, "Skipping feed target: {}", e);
                rejected.push(RejectedTarget { target: label, reason: e.to_string() });
                continue;
            }
        };

        if raw.enabled == Some(false) {
            info!(target_key = %label, "Feed target disabled");
            continue;
        }

        let checked = build_target(raw, base_dir).and_then(|target| {
            if !seen_keys.insert(target.key.clone()) {
                return Err(format!("duplicate key '{}'", target.key));
            }
            if !seen_outputs.insert(target.output_path.clone())
                || !seen_outputs.insert(target.archive_path.clone())
            {
                return Err("output or archive path collides with another target".to_string());
            }
            Ok(target)
        });

        match checked {
            Ok(target) => {
                debug!(target_key = %target.key, "Accepted feed target");
                targets.push(target);
            }
            Err(reason) => {
                warn!(target_key = %label, "Skipping feed target: {}", reason);
                rejected.push(RejectedTarget { target: label, reason });
            }
        }
    }

    (targets, rejected)
}

fn build_target(raw: RawTarget, base_dir: &Path) -> std::result::Result<FeedTarget, String> {
    let key = required(raw.key, "key")?;
    let output = required(raw.output, "output")?;
    let link = required(raw.link, "link")?;

    let source_attribution = match raw.source_attribution.as_deref() {
        None => AttributionPolicy::None,
        Some(policy) => AttributionPolicy::parse(policy)
            .ok_or_else(|| format!("unknown source_attribution '{}'", policy))?,
    };

    let sources: Vec<LiveSourceSpec> = match raw.sources {
        None => Vec::new(),
        Some(SourcesShape::One(source)) => vec![source.into()],
        Some(SourcesShape::Many(sources)) => sources.into_iter().map(Into::into).collect(),
    };
    if let Some(bad) = sources.iter().find(|s| !crate::rss_utils::url::is_valid_feed_url(&s.uri)) {
        return Err(format!("invalid source url '{}'", bad.uri));
    }

    let table = raw.table.map(|t| TableSpec {
        rows_path: resolve_path(base_dir, &t.rows),
        date_column: t.date_column,
        rating_column: t.rating_column,
    });

    if sources.is_empty() && table.is_none() {
        return Err("no sources or table configured".to_string());
    }

    let output_path = resolve_path(base_dir, &output);
    let archive_path = match raw.archive {
        Some(archive) => resolve_path(base_dir, &archive),
        None => default_archive_path(&output_path),
    };
    if archive_path == output_path {
        return Err("archive path equals output path".to_string());
    }

    Ok(FeedTarget {
        title: raw.title.unwrap_or_else(|| key.clone()),
        description: raw.description.unwrap_or_default(),
        key,
        link,
        output_path,
        archive_path,
        max_items: raw.max_items,
        retention_days: raw.retention_days,
        archive_max_items: raw.archive_max_items,
        archive_retention_days: raw.archive_retention_days,
        source_attribution,
        sources,
        table,
        exclude_domains: raw
            .exclude_domains
            .into_iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect(),
        max_description_length: raw.max_description_length,
    })
}

impl From<RawSource> for LiveSourceSpec {
    fn from(source: RawSource) -> Self {
        match source {
            RawSource::Url(url) => LiveSourceSpec { uri: url.trim().to_string(), label: None },
            RawSource::Detailed { url, name } => LiveSourceSpec {
                uri: url.trim().to_string(),
                label: name.filter(|n| !n.trim().is_empty()),
            },
        }
    }
}

fn required(value: Option<String>, field: &str) -> std::result::Result<String, String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required field '{}'", field))
}

/// Site-root style paths (`/feed.xml`) are treated as relative to the base directory.
fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    base_dir.join(raw.trim().trim_start_matches('/'))
}

/// `feed.xml` -> `feed_archive.xml`
pub fn default_archive_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "feed".to_string());
    let extension = output_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xml".to_string());
    output_path.with_file_name(format!("{}_archive.{}", stem, extension))
}
