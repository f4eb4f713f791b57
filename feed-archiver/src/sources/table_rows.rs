use crate::traits::PullFeed;
use crate::types::{FeedError, RawRecord, Result, TableRow};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Rows of the scraped ratings table, handed over by the browser scraper as a JSON
/// array of `{ "cells": [ { "header", "text", "links" } ] }`.
pub struct TableRowsSource {
    rows_path: PathBuf,
}

impl TableRowsSource {
    pub fn new(rows_path: PathBuf) -> Self {
        Self { rows_path }
    }
}

#[async_trait]
impl PullFeed for TableRowsSource {
    fn source_id(&self) -> String {
        format!("table:{}", self.rows_path.display())
    }

    fn source_name(&self) -> String {
        "Scraped table".to_string()
    }

    async fn pull(&self) -> Result<Vec<RawRecord>> {
        let unavailable = |reason: String| {
            FeedError::source_unavailable(self.rows_path.display().to_string(), reason)
        };

        let raw = tokio::fs::read_to_string(&self.rows_path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let rows: Vec<TableRow> = serde_json::from_str(&raw).map_err(|e| unavailable(e.to_string()))?;

        info!("Read {} table rows from {}", rows.len(), self.rows_path.display());
        Ok(rows.into_iter().map(RawRecord::from).collect())
    }
}
