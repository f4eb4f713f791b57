use crate::types::{RawRecord, Result};
use async_trait::async_trait;

/// Trait for pulling raw records from an upstream source (external feeds, scraped tables)
#[async_trait]
pub trait PullFeed: Send + Sync {
    /// Unique identifier for this source, used in logs and reports
    fn source_id(&self) -> String;

    /// Human-readable name for this source
    fn source_name(&self) -> String;

    /// Fetch the records currently offered by the source.
    ///
    /// A failure means the source contributed nothing this run, never that it is empty.
    async fn pull(&self) -> Result<Vec<RawRecord>>;
}
