//! Durable Comic Store
//!
//! Keeps the ingested collection in a single JSON artifact on disk, fronted by an
//! in-memory write buffer.
//!
//! ## Responsibilities
//! - **Buffering**: `append` collects freshly normalized items in memory.
//! - **Flushing**: once the buffer reaches the threshold, the existing artifact is merged
//!   with the buffer and replaced through a temp-file + rename, so readers only ever see
//!   the previous or the new complete collection.
//! - **Index Trigger**: after every successful flush the configured `Indexer` rewrites the
//!   index artifact while the buffer lock is still held.
//! - **Lookups**: linear scans over the persisted artifact (`get_by_id`, `get_all`).

use super::index::Indexer;
use super::types::{AppendOutcome, Item, StoreError, StoreResult};

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

pub struct Store {
    /// Location of the Collection artifact.
    db_path: PathBuf,
    /// Rewrites the index after each flush. `None` keeps the store index-free.
    indexer: Option<Indexer>,
    flush_threshold: usize,
    /// Items awaiting durability. The lock spans append, flush and index rebuild.
    buffer: Mutex<Vec<Item>>,
    /// Set when the last index rebuild failed; the next flush retries it.
    index_stale: AtomicBool,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>, flush_threshold: usize) -> Self {
        Self {
            db_path: db_path.into(),
            indexer: None,
            flush_threshold: flush_threshold.max(1),
            buffer: Mutex::new(Vec::new()),
            index_stale: AtomicBool::new(false),
        }
    }

    /// Attaches the indexer that runs after every successful flush.
    pub fn with_indexer(mut self, indexer: Indexer) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Number of items currently buffered in memory.
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Buffers an item and flushes once the threshold is reached.
    ///
    /// The item is in the buffer before any I/O happens, so an error here never loses it:
    /// a failed flush keeps the whole buffer for the next attempt.
    pub async fn append(&self, item: Item) -> StoreResult<AppendOutcome> {
        let mut buffer = self.buffer.lock().await;
        buffer.push(item);

        if buffer.len() < self.flush_threshold {
            return Ok(AppendOutcome::Buffered {
                pending: buffer.len(),
            });
        }

        let flushed = buffer.len();
        let collection = self.flush_locked(&mut buffer).await?;
        self.rebuild_index(&collection).await?;

        Ok(AppendOutcome::Flushed {
            flushed,
            total: collection.len(),
        })
    }

    /// Persists whatever is buffered and rebuilds the index.
    ///
    /// Returns the number of items written. An empty buffer leaves the collection untouched;
    /// the index is only rewritten if an earlier rebuild failed.
    pub async fn flush(&self) -> StoreResult<usize> {
        let mut buffer = self.buffer.lock().await;
        if buffer.is_empty() {
            if self.index_stale.load(Ordering::SeqCst) {
                let collection = read_collection(&self.db_path).await.map_err(|err| {
                    StoreError::Index {
                        reason: err.to_string(),
                    }
                })?;
                self.rebuild_index(&collection).await?;
                tracing::info!("Rebuilt stale index from {} items", collection.len());
            }
            return Ok(0);
        }

        let flushed = buffer.len();
        let collection = self.flush_locked(&mut buffer).await?;
        self.rebuild_index(&collection).await?;
        Ok(flushed)
    }

    /// Returns the highest persisted id and the set of every persisted id.
    pub async fn last_known_id(&self) -> StoreResult<(u64, HashSet<u64>)> {
        let collection = read_collection(&self.db_path).await?;

        let mut max_id = 0u64;
        let mut known = HashSet::with_capacity(collection.len());
        for item in &collection {
            max_id = max_id.max(item.id);
            known.insert(item.id);
        }

        Ok((max_id, known))
    }

    /// First persisted item with the given id.
    pub async fn get_by_id(&self, id: u64) -> StoreResult<Option<Item>> {
        let collection = read_collection(&self.db_path).await?;
        Ok(collection.into_iter().find(|item| item.id == id))
    }

    pub async fn get_all(&self) -> StoreResult<Vec<Item>> {
        read_collection(&self.db_path).await
    }

    /// Merges the buffer into the artifact. Caller must hold the buffer lock.
    ///
    /// Returns the full collection as written so the index can be rebuilt from it
    /// without reading the file back.
    async fn flush_locked(&self, buffer: &mut Vec<Item>) -> StoreResult<Vec<Item>> {
        let pending = buffer.len();
        let persistence = |err: StoreError| StoreError::Persistence {
            pending,
            reason: err.to_string(),
        };

        let mut collection = read_collection(&self.db_path)
            .await
            .map_err(persistence)?;
        collection.extend(buffer.iter().cloned());

        let encoded = serde_json::to_vec_pretty(&collection).map_err(|source| {
            persistence(StoreError::Encode {
                path: self.db_path.clone(),
                source,
            })
        })?;
        write_atomically(&self.db_path, &encoded)
            .await
            .map_err(persistence)?;

        buffer.clear();
        tracing::info!(
            "Flushed {} items to {} ({} total)",
            pending,
            self.db_path.display(),
            collection.len()
        );

        Ok(collection)
    }

    async fn rebuild_index(&self, collection: &[Item]) -> StoreResult<()> {
        let Some(indexer) = &self.indexer else {
            return Ok(());
        };

        let result = indexer.rebuild(collection).await;
        self.index_stale.store(result.is_err(), Ordering::SeqCst);
        result.map(|_| ()).map_err(|err| StoreError::Index {
            reason: err.to_string(),
        })
    }
}

/// Reads the collection artifact. A missing or blank file is an empty collection.
pub(crate) async fn read_collection(path: &Path) -> StoreResult<Vec<Item>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `bytes` next to `path` and renames the temp file over it.
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp_path = temp_path_for(path);
    let io_err = |source: std::io::Error| StoreError::Io {
        path: tmp_path.clone(),
        source,
    };

    let mut file = tokio::fs::File::create(&tmp_path).await.map_err(io_err)?;
    file.write_all(bytes).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".tmp");
    path.with_file_name(name)
}
