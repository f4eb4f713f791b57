mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::{
    closed_port_url, fixed_now, ids, init_tracing, quick_fetch, serve_feed, target, temp_dir,
    UPSTREAM_RSS,
};
use feed_archiver::store::load_feed_items;
use feed_archiver::{
    AppConfig, AttributionPolicy, ChangeStatus, FeedError, FeedPipeline, FeedTarget,
    LiveSourceSpec, PullFeed, RawRecord, Result, TableCell, TableRow, TableSpec,
};
use std::path::Path;
use tracing::info;

struct StaticSource {
    records: Vec<RawRecord>,
}

#[async_trait]
impl PullFeed for StaticSource {
    fn source_id(&self) -> String {
        "static".to_string()
    }

    fn source_name(&self) -> String {
        "Static".to_string()
    }

    async fn pull(&self) -> Result<Vec<RawRecord>> {
        Ok(self.records.clone())
    }
}

struct DownSource;

#[async_trait]
impl PullFeed for DownSource {
    fn source_id(&self) -> String {
        "down".to_string()
    }

    fn source_name(&self) -> String {
        "Down".to_string()
    }

    async fn pull(&self) -> Result<Vec<RawRecord>> {
        Err(FeedError::source_unavailable("down", "connection refused"))
    }
}

fn row(title: &str, link: &str, extra: &str) -> RawRecord {
    let mut cells = vec![TableCell {
        header: None,
        text: title.to_string(),
        links: vec![link.to_string()],
    }];
    if !extra.is_empty() {
        cells.extend((0..2).map(|i| TableCell {
            header: None,
            text: format!("col{}", i),
            links: Vec::new(),
        }));
        cells.push(TableCell {
            header: None,
            text: extra.to_string(),
            links: Vec::new(),
        });
    }
    RawRecord::from(TableRow { cells })
}

fn dated_row(title: &str, date: &str) -> RawRecord {
    RawRecord::from(TableRow {
        cells: vec![
            TableCell {
                header: None,
                text: date.to_string(),
                links: Vec::new(),
            },
            TableCell {
                header: None,
                text: title.to_string(),
                links: vec![format!("https://papers.example.com/{}", title)],
            },
        ],
    })
}

fn static_source(records: Vec<RawRecord>) -> Box<dyn PullFeed> {
    Box::new(StaticSource { records })
}

fn pipeline_for(dir: &Path, targets: Vec<FeedTarget>) -> FeedPipeline {
    let config = AppConfig {
        targets,
        rejected: Vec::new(),
        fetch: quick_fetch(),
        snapshot_path: dir.join("previous_data.json"),
    };
    FeedPipeline::new(config).unwrap()
}

#[tokio::test]
async fn test_failed_source_keeps_active_items() {
    init_tracing();
    let dir = temp_dir();
    let target = target(&dir, "gai");
    let pipeline = pipeline_for(&dir, vec![target.clone()]);

    let first = pipeline
        .process_target(
            &target,
            vec![static_source(vec![
                row("One", "https://a.example.com/1", ""),
                row("Two", "https://a.example.com/2", ""),
            ])],
            fixed_now(),
        )
        .await
        .unwrap();
    assert_eq!(first.report.active, 2);

    let second = pipeline
        .process_target(&target, vec![Box::new(DownSource) as Box<dyn PullFeed>], fixed_now() + Duration::days(1))
        .await
        .unwrap();

    info!("Second run report: {:?}", second.report);
    assert_eq!(second.report.sources_failed, 1);
    assert_eq!(ids(&second.active), ids(&first.active));
    assert_eq!(load_feed_items(&target.output_path, &target).unwrap().len(), 2);
}

#[tokio::test]
async fn test_published_at_survives_edits_across_runs() {
    init_tracing();
    let dir = temp_dir();
    let target = target(&dir, "gai");
    let pipeline = pipeline_for(&dir, vec![target.clone()]);
    let link = "https://a.example.com/guide";

    pipeline
        .process_target(&target, vec![static_source(vec![row("Guide", link, "v1 notes")])], fixed_now())
        .await
        .unwrap();

    let later = fixed_now() + Duration::days(2);
    let second = pipeline
        .process_target(&target, vec![static_source(vec![row("Guide", link, "v2 notes")])], later)
        .await
        .unwrap();

    assert_eq!(second.active.len(), 1);
    assert_eq!(second.active[0].description, "v2 notes");
    assert_eq!(second.active[0].published_at, fixed_now());
    assert_eq!(second.report.refreshed, 1);

    let persisted = load_feed_items(&target.output_path, &target).unwrap();
    assert_eq!(persisted[0].published_at, fixed_now());
    assert_eq!(persisted[0].description, "v2 notes");
}

#[tokio::test]
async fn test_duplicates_across_sources_collapse() {
    let dir = temp_dir();
    let target = target(&dir, "gai");
    let pipeline = pipeline_for(&dir, vec![target.clone()]);

    let outcome = pipeline
        .process_target(
            &target,
            vec![
                static_source(vec![row("First copy", "https://a.example.com/x", "")]),
                static_source(vec![
                    row("Second copy", "https://a.example.com/x/", ""),
                    row("Other", "https://a.example.com/y", ""),
                ]),
            ],
            fixed_now(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.report.records, 3);
    assert_eq!(outcome.report.duplicates, 1);
    assert_eq!(outcome.active.len(), 2);
    assert!(outcome.active.iter().any(|i| i.title == "First copy"));
}

#[tokio::test]
async fn test_max_items_writes_archive_file() {
    let dir = temp_dir();
    let mut target = target(&dir, "gai");
    target.max_items = Some(2);
    target.table = Some(TableSpec {
        rows_path: dir.join("rows.json"),
        date_column: Some(0),
        rating_column: None,
    });
    let pipeline = pipeline_for(&dir, vec![target.clone()]);

    pipeline
        .process_target(
            &target,
            vec![static_source(vec![
                dated_row("old", "2025-05-01"),
                dated_row("mid", "2025-05-10"),
                dated_row("new", "2025-05-20"),
            ])],
            fixed_now(),
        )
        .await
        .unwrap();

    let active = load_feed_items(&target.output_path, &target).unwrap();
    let archive = load_feed_items(&target.archive_path, &target).unwrap();
    let titles = |items: &[feed_archiver::Item]| items.iter().map(|i| i.title.clone()).collect::<Vec<_>>();

    assert_eq!(titles(&active), vec!["new", "mid"]);
    assert_eq!(titles(&archive), vec!["old"]);
}

#[tokio::test]
async fn test_unreachable_source_still_writes_target() {
    init_tracing();
    let dir = temp_dir();
    let mut target = target(&dir, "agg");
    target.sources = vec![LiveSourceSpec {
        uri: closed_port_url(),
        label: None,
    }];
    let pipeline = pipeline_for(&dir, vec![target.clone()]);

    let sources = pipeline.sources_for(&target);
    let outcome = pipeline.process_target(&target, sources, fixed_now()).await.unwrap();

    assert_eq!(outcome.report.sources, 1);
    assert_eq!(outcome.report.sources_failed, 1);
    assert!(outcome.active.is_empty());
    assert!(target.output_path.exists());
    assert!(target.archive_path.exists());
}

#[tokio::test]
async fn test_full_run_from_config() {
    init_tracing();
    let dir = temp_dir();
    let feed_url = serve_feed(UPSTREAM_RSS).await;

    std::fs::write(
        dir.join("rows.json"),
        r#"[
  {"cells": [{"text": "2025-05-28"}, {"text": "Scaling laws", "links": ["https://papers.example.com/scaling"]}, {"text": "essential"}]},
  {"cells": [{"text": ""}, {"text": ""}]}
]"#,
    )
    .unwrap();

    let raw = format!(
        r#"
fetch:
  timeout_seconds: 5
  max_retries: 0
  retry_delay_seconds: 0
feeds:
  - key: gai
    title: Generative AI
    link: https://rss.example.org/
    output: /feed.xml
    table:
      rows: rows.json
      date_column: 0
      rating_column: 2
  - key: agg
    title: Aggregated
    link: https://rss.example.org/agg/
    output: /agg.xml
    source_attribution: title
    sources:
      - {feed_url}
"#
    );
    let config = AppConfig::from_yaml_str(&raw, &dir).unwrap();
    assert_eq!(config.targets.len(), 2);

    let report = FeedPipeline::new(config.clone()).unwrap().run(fixed_now()).await;
    info!("First run: {}", serde_json::to_string(&report).unwrap());

    assert!(report.failed.is_empty());
    assert_eq!(report.changed, ChangeStatus::Changed);
    assert_eq!(report.changed_targets, vec!["agg".to_string(), "gai".to_string()]);

    let gai = &report.targets[0];
    assert_eq!(gai.records, 2);
    assert_eq!(gai.malformed, 1);
    assert_eq!(gai.active, 1);
    let agg = &report.targets[1];
    assert_eq!(agg.active, 2);

    let agg_target = config.targets[1].clone();
    assert_eq!(agg_target.source_attribution, AttributionPolicy::Title);
    let xml = std::fs::read_to_string(dir.join("agg.xml")).unwrap();
    assert!(xml.contains("<title>Post one (via Upstream Blog)</title>"));
    let gai_xml = std::fs::read_to_string(dir.join("feed.xml")).unwrap();
    assert!(gai_xml.contains("<title>Scaling laws [!]</title>"));
    assert!(dir.join("previous_data.json").exists());

    // Same upstream content: nothing to publish, decoration not doubled.
    let report = FeedPipeline::new(config).unwrap().run(fixed_now() + Duration::hours(6)).await;
    assert_eq!(report.changed, ChangeStatus::Unchanged);
    assert!(report.changed_targets.is_empty());

    let xml = std::fs::read_to_string(dir.join("agg.xml")).unwrap();
    assert_eq!(xml.matches("(via Upstream Blog)").count(), 2);
    let persisted = load_feed_items(&dir.join("agg.xml"), &agg_target).unwrap();
    assert_eq!(persisted[0].title, "Post one");
}

#[tokio::test]
async fn test_failed_target_does_not_block_others() {
    init_tracing();
    let dir = temp_dir();
    std::fs::write(dir.join("blocker"), "x").unwrap();
    std::fs::write(
        dir.join("rows.json"),
        r#"[{"cells": [{"text": "Only row", "links": ["https://a.example.com/only"]}]}]"#,
    )
    .unwrap();

    let table = TableSpec {
        rows_path: dir.join("rows.json"),
        date_column: None,
        rating_column: None,
    };
    let mut broken = target(&dir, "broken");
    broken.output_path = dir.join("blocker").join("feed.xml");
    broken.archive_path = dir.join("blocker").join("feed_archive.xml");
    broken.table = Some(table.clone());
    let mut healthy = target(&dir, "gai");
    healthy.table = Some(table);

    let report = pipeline_for(&dir, vec![broken, healthy.clone()]).run(fixed_now()).await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "broken");
    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.targets[0].key, "gai");
    assert_eq!(report.changed_targets, vec!["gai".to_string()]);
    assert!(healthy.output_path.exists());
}

#[tokio::test]
async fn test_rows_dropped_from_archive_do_not_churn_the_feed() {
    init_tracing();
    let dir = temp_dir();
    let mut target = target(&dir, "gai");
    target.max_items = Some(1);
    target.archive_max_items = Some(1);
    let pipeline = pipeline_for(&dir, vec![target.clone()]);
    let rows = || {
        static_source(vec![
            row("Alpha", "https://a.example.com/alpha", ""),
            row("Beta", "https://a.example.com/beta", ""),
            row("Gamma", "https://a.example.com/gamma", ""),
        ])
    };

    let first = pipeline.process_target(&target, vec![rows()], fixed_now()).await.unwrap();
    assert_eq!(first.active.len(), 1);
    assert_eq!(first.archive.len(), 1);
    assert_eq!(first.report.dropped, 1);
    let ledger = dir.join("gai_archive.retired.json");
    assert!(ledger.exists());

    for day in 1..=2 {
        let outcome = pipeline
            .process_target(&target, vec![rows()], fixed_now() + Duration::days(day))
            .await
            .unwrap();
        info!("Day {} report: {:?}", day, outcome.report);

        assert_eq!(ids(&outcome.active), ids(&first.active));
        assert_eq!(outcome.active[0].published_at, fixed_now());
        assert_eq!(ids(&outcome.archive), ids(&first.archive));
        assert_eq!(outcome.report.added, 0);
        assert_eq!(outcome.report.already_retired, 1);
        assert_eq!(outcome.report.dropped, 0);
    }

    let persisted = load_feed_items(&target.output_path, &target).unwrap();
    assert_eq!(ids(&persisted), ids(&first.active));
    let retired = feed_archiver::store::load_retired(&ledger).unwrap();
    assert_eq!(retired.len(), 1);
    assert!(!retired.contains(&first.active[0].id));
    assert!(!retired.contains(&first.archive[0].id));
}

#[tokio::test]
async fn test_archive_drop_alone_is_a_change() {
    init_tracing();
    let dir = temp_dir();
    std::fs::write(
        dir.join("rows.json"),
        r#"[
  {"cells": [{"text": "2025-05-28"}, {"text": "Recent", "links": ["https://papers.example.com/recent"]}]},
  {"cells": [{"text": "2025-05-20"}, {"text": "Older", "links": ["https://papers.example.com/older"]}]}
]"#,
    )
    .unwrap();

    let mut target = target(&dir, "gai");
    target.max_items = Some(1);
    target.archive_retention_days = Some(30);
    target.table = Some(TableSpec {
        rows_path: dir.join("rows.json"),
        date_column: Some(0),
        rating_column: None,
    });
    let pipeline = pipeline_for(&dir, vec![target.clone()]);

    let first = pipeline.run(fixed_now()).await;
    assert_eq!(first.changed, ChangeStatus::Changed);
    assert_eq!(first.targets[0].archived, 1);

    // Twenty days on the archived row is past 30 days old; the active set is untouched.
    let second = pipeline.run(fixed_now() + Duration::days(20)).await;
    let report = &second.targets[0];
    assert_eq!(report.active, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.archived, 0);
    assert_eq!(second.changed, ChangeStatus::Changed);
    assert_eq!(second.changed_targets, vec!["gai".to_string()]);

    // Nothing left to drop.
    let third = pipeline.run(fixed_now() + Duration::days(21)).await;
    assert_eq!(third.changed, ChangeStatus::Unchanged);
}

#[tokio::test]
async fn test_relative_entry_links_resolve_against_upstream_feed() {
    init_tracing();
    let dir = temp_dir();
    let feed_url = serve_feed(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Relative Blog</title>
    <link>/</link>
    <description>Posts with site-relative links</description>
    <item>
      <title>Post three</title>
      <link>/posts/three</link>
      <description>Third post</description>
      <pubDate>Thu, 29 May 2025 10:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>
"#,
    )
    .await;

    let mut target = target(&dir, "agg");
    target.sources = vec![LiveSourceSpec {
        uri: feed_url.clone(),
        label: None,
    }];
    let pipeline = pipeline_for(&dir, vec![target.clone()]);

    let sources = pipeline.sources_for(&target);
    let outcome = pipeline.process_target(&target, sources, fixed_now()).await.unwrap();

    assert_eq!(outcome.report.sources_failed, 0);
    assert_eq!(outcome.active.len(), 1);
    assert_eq!(outcome.active[0].link, feed_url.replace("/feed.xml", "/posts/three"));
    assert!(!outcome.active[0].link.starts_with(common::SITE_LINK));
}
