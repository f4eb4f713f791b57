pub mod types;
pub mod config;
pub mod rss_utils;
pub mod traits;
pub mod fetcher;
pub mod parser;
pub mod sources;
pub mod normalizer;
pub mod fingerprint;
pub mod retention;
pub mod assembler;
pub mod store;
pub mod change_detector;
pub mod pipeline;

pub use types::*;
pub use config::{AppConfig, AttributionPolicy, FeedTarget, RejectedTarget, TableSpec};
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use traits::PullFeed;
pub use sources::{RssFeedSource, TableRowsSource};
pub use normalizer::Normalizer;
pub use retention::{PriorState, RetentionLimits, RetentionOutcome};
pub use change_detector::{ChangeDetector, ChangeStatus, Snapshot};
pub use pipeline::{FeedPipeline, RunReport, TargetReport};
