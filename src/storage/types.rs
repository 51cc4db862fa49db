//! Storage Data Types
//!
//! Defines the persisted record format and the errors raised by the storage layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single ingested comic, as stored in the Collection artifact.
///
/// Created by the persist workers once a fetched record has been normalized.
/// Never mutated after it reaches disk. `keywords` keeps duplicates so that
/// term frequency survives into the index postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Numeric id of the comic on the remote source.
    #[serde(alias = "num")]
    pub id: u64,
    /// Image URL of the comic.
    #[serde(alias = "img")]
    pub media_ref: String,
    /// Normalized terms in text order.
    pub keywords: Vec<String>,
}

/// Result of appending one item to the write buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The item sits in memory; `pending` items await the next flush.
    Buffered { pending: usize },
    /// The append crossed the flush threshold and the buffer was persisted.
    Flushed { flushed: usize, total: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is not a valid artifact: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Flush could not replace the collection; the buffer was kept.
    #[error("flush of {pending} buffered items failed: {reason}")]
    Persistence { pending: usize, reason: String },

    /// The collection was persisted but the index could not be rewritten.
    #[error("index rebuild failed: {reason}")]
    Index { reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
