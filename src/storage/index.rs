//! Inverted Index
//!
//! Maps every normalized term to the ids of the comics containing it. The index is never
//! patched in place: it is rebuilt from the full collection after each flush and written
//! back as one JSON document.

use super::store::write_atomically;
use super::types::{Item, StoreError, StoreResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Term -> postings. Postings keep collection order and repeat an id once per
/// occurrence of the term in that item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    postings: BTreeMap<String, Vec<u64>>,
}

impl Index {
    /// Builds the index from scratch, walking items and keywords in order.
    pub fn rebuild(collection: &[Item]) -> Self {
        let mut postings: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for item in collection {
            for keyword in &item.keywords {
                postings.entry(keyword.clone()).or_default().push(item.id);
            }
        }
        Self { postings }
    }

    pub fn postings(&self, term: &str) -> Option<&[u64]> {
        self.postings.get(term).map(Vec::as_slice)
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Loads a persisted index. A missing file is an empty index.
    pub async fn load(path: &Path) -> StoreResult<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn save(&self, path: &Path) -> StoreResult<()> {
        let encoded = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomically(path, &encoded).await
    }
}

/// Owns the location of the index artifact and rewrites it on demand.
#[derive(Debug, Clone)]
pub struct Indexer {
    index_path: PathBuf,
}

impl Indexer {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Rebuilds the index from `collection` and replaces the artifact.
    pub async fn rebuild(&self, collection: &[Item]) -> StoreResult<Index> {
        let index = Index::rebuild(collection);
        index.save(&self.index_path).await?;

        tracing::debug!(
            "Rebuilt index with {} terms from {} items",
            index.len(),
            collection.len()
        );
        Ok(index)
    }

    pub async fn load(&self) -> StoreResult<Index> {
        Index::load(&self.index_path).await
    }
}
