use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use feed_archiver::{AppConfig, FeedPipeline};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Merge scraped and aggregated items into rolling RSS feeds plus archives.
#[derive(Debug, Parser)]
#[command(name = "feed-archiver", version)]
struct Args {
    /// Site configuration file
    #[arg(short, long, default_value = "_config.yml")]
    config: PathBuf,

    /// Override the snapshot file used for change detection
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting feed archiver with {}", args.config.display());

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(snapshot) = args.snapshot {
        config.snapshot_path = snapshot;
    }

    let pipeline = FeedPipeline::new(config).context("building HTTP client")?;
    let report = pipeline.run(Utc::now()).await;

    for failed in &report.failed {
        warn!("Target {} not updated: {}", failed.key, failed.reason);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("changed={}", report.changed.is_changed());
    }

    Ok(())
}
