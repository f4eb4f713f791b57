#![allow(dead_code)]

// Shared fixtures for the integration tests
use chrono::{DateTime, Duration, TimeZone, Utc};
use feed_archiver::{AttributionPolicy, FeedTarget, Item};
use std::path::{Path, PathBuf};
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Fresh scratch directory under the system temp dir.
pub fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("feed-archiver-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    fixed_now() - Duration::days(days)
}

pub const SITE_LINK: &str = "https://rss.example.org/";

pub fn target(dir: &Path, key: &str) -> FeedTarget {
    FeedTarget {
        key: key.to_string(),
        title: format!("{} feed", key),
        link: SITE_LINK.to_string(),
        description: format!("Items for {}", key),
        output_path: dir.join(format!("{}.xml", key)),
        archive_path: dir.join(format!("{}_archive.xml", key)),
        max_items: None,
        retention_days: None,
        archive_max_items: None,
        archive_retention_days: None,
        source_attribution: AttributionPolicy::None,
        sources: Vec::new(),
        table: None,
        exclude_domains: Vec::new(),
        max_description_length: None,
    }
}

pub fn item(id: &str, published_at: DateTime<Utc>) -> Item {
    Item {
        id: id.to_string(),
        title: format!("Title {}", id),
        link: format!("https://news.example.com/{}", id),
        description: format!("Description {}", id),
        published_at,
        source_key: "gai".to_string(),
        attribution: None,
    }
}

pub fn ids(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

pub const UPSTREAM_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Upstream Blog</title>
    <link>https://blog.example.com/</link>
    <description>Posts from upstream</description>
    <item>
      <title>Post one</title>
      <link>https://blog.example.com/one</link>
      <description>First post</description>
      <pubDate>Sat, 31 May 2025 10:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Post two</title>
      <link>https://blog.example.com/two</link>
      <description>Second post</description>
      <pubDate>Fri, 30 May 2025 10:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>
"#;

/// Serves `body` to every request on a local port and returns the feed URL.
pub async fn serve_feed(body: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let body = body.to_string();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/rss+xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/feed.xml", addr)
}

/// A URL on a port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}/feed.xml", addr)
}

/// Fetch settings that fail fast.
pub fn quick_fetch() -> feed_archiver::FetchConfig {
    feed_archiver::FetchConfig {
        timeout_seconds: 5,
        max_retries: 0,
        retry_delay_seconds: 0,
        ..Default::default()
    }
}
