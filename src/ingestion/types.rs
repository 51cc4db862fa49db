//! Ingestion Data Types
//!
//! Defines the wire records received from the comic source, the pipeline's configuration
//! and the report handed back once a run terminates.

use crate::search::normalizer::Normalizer;
use crate::storage::types::{Item, StoreError};
use serde::{Deserialize, Serialize};

/// A comic as served by the remote source (`{base}/{id}/info.0.json`).
///
/// Only the fields the indexer needs are decoded; everything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub num: u64,
    pub img: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub safe_title: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub alt: String,
}

impl SourceRecord {
    /// Free text that feeds the index: transcript followed by alt text.
    pub fn text(&self) -> String {
        format!("{} {}", self.transcript, self.alt)
    }

    /// Normalizes the record's text into a storable item.
    pub fn into_item(self, normalizer: &Normalizer) -> Item {
        let keywords = normalizer.normalize(&self.text());
        Item {
            id: self.num,
            media_ref: self.img,
            keywords,
        }
    }
}

/// Per-id fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The source has no comic under this id. Never retried.
    #[error("comic {id} not found")]
    NotFound { id: u64 },

    /// Network, status or payload failure. The pipeline moves on to the next id.
    #[error("fetching comic {id} failed: {reason}")]
    Transient { id: u64, reason: String },
}

/// Knobs of one ingestion run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of concurrent fetch workers.
    pub download_concurrency: usize,
    /// Number of concurrent persist workers.
    pub persist_concurrency: usize,
    /// Consecutive missing ids above the highest fetched id that end the run.
    pub not_found_budget: usize,
    /// Transient fetch errors tolerated before the run is aborted.
    pub transient_error_budget: usize,
    /// Capacity of the fetch -> persist handoff queue.
    pub handoff_capacity: usize,
    /// Fetch ids below the stored maximum that are missing from the collection.
    pub backfill_gaps: bool,
}

impl PipelineConfig {
    /// Clamps every knob to a usable minimum of one.
    pub fn normalized(mut self) -> Self {
        self.download_concurrency = self.download_concurrency.max(1);
        self.persist_concurrency = self.persist_concurrency.max(1);
        self.not_found_budget = self.not_found_budget.max(1);
        self.transient_error_budget = self.transient_error_budget.max(1);
        self.handoff_capacity = self.handoff_capacity.max(1);
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            download_concurrency: cpus,
            persist_concurrency: 2,
            not_found_budget: 5,
            transient_error_budget: 2,
            handoff_capacity: cpus,
            backfill_gaps: true,
        }
    }
}

/// Why a run stopped. Exactly one applies per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The not-found budget was met: the id space is presumed exhausted.
    Exhausted,
    /// Too many transient fetch errors.
    ErrorBudgetExceeded,
    /// External shutdown request.
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub termination: Termination,
    /// Items accepted into the store during this run.
    pub newly_ingested: usize,
    /// Known ids before the run plus `newly_ingested`.
    pub total_known: usize,
    pub transient_errors: usize,
    /// Failed flush or index rebuild attempts, including the final flush.
    pub store_failures: usize,
    pub last_store_failure: Option<String>,
}

/// Errors that prevent a run from reporting success.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read the collection before the run: {0}")]
    Init(#[source] StoreError),

    /// The final flush could not persist the remaining buffer.
    #[error("final flush failed after ingesting {newly_ingested} comics: {source}")]
    FinalFlush {
        newly_ingested: usize,
        #[source]
        source: StoreError,
    },
}

/// Body returned by the update endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub newly_ingested: usize,
    pub total_known: usize,
    pub termination: Termination,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateErrorResponse {
    pub error: String,
}
