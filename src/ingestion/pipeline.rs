//! Ingestion Pipeline
//!
//! Drives one ingestion run: `D` fetch workers claim ids from a shared cursor and push
//! fetched records into a bounded handoff queue; `P` persist workers drain the queue,
//! normalize each record and append it to the store.
//!
//! ## Lifecycle
//! 1. **Seed**: read the highest stored id and the known-id set; the cursor starts at `max + 1`.
//!    Ids missing below the maximum are queued first when gap backfill is on.
//! 2. **Fetch**: each worker checks the shutdown token, claims an id, fetches it and hands
//!    the record off. The push blocks while persist workers are behind.
//! 3. **Persist**: items are appended under the store's buffer lock; the appending worker
//!    flushes and rebuilds the index when the threshold is reached.
//! 4. **Drain**: once every fetch worker has exited the queue closes, persist workers finish
//!    what is left, and a final flush writes any remainder.
//!
//! ## Termination
//! - **Exhausted**: the `F` ids directly above the highest fetched id all came back missing,
//!   skipping over ids that failed transiently.
//! - **ErrorBudgetExceeded**: `E` transient fetch errors.
//! - **Cancelled**: the external token fired.
//!
//! Shutdown is cooperative. A fetch already in flight completes, and its record is still
//! handed off and persisted.

use super::source::Source;
use super::types::{FetchError, PipelineConfig, PipelineError, RunReport, SourceRecord, Termination};
use crate::search::normalizer::Normalizer;
use crate::storage::store::Store;
use crate::storage::types::{AppendOutcome, StoreError};

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn Source>,
    normalizer: Arc<Normalizer>,
    store: Arc<Store>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn Source>,
        normalizer: Arc<Normalizer>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            config: config.normalized(),
            source,
            normalizer,
            store,
        }
    }

    /// Runs until exhaustion, the error budget, or cancellation of `cancel`.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
        let (max_id, known) = self
            .store
            .last_known_id()
            .await
            .map_err(PipelineError::Init)?;

        let gaps: VecDeque<u64> = if self.config.backfill_gaps {
            (1..max_id).filter(|id| !known.contains(id)).collect()
        } else {
            VecDeque::new()
        };

        tracing::info!(
            "Starting ingestion run: {} known, next id {}, {} gaps, {}/{} fetch/persist workers",
            known.len(),
            max_id + 1,
            gaps.len(),
            self.config.download_concurrency,
            self.config.persist_concurrency
        );

        let state = Arc::new(RunState::new(
            max_id,
            gaps,
            self.config.not_found_budget as u64,
            cancel.child_token(),
        ));
        let known = Arc::new(known);

        let (item_tx, item_rx) = mpsc::channel::<SourceRecord>(self.config.handoff_capacity);
        let item_rx = Arc::new(Mutex::new(item_rx));
        let (error_tx, error_rx) = mpsc::unbounded_channel::<FetchError>();
        let reporter = tokio::spawn(report_fetch_errors(error_rx));

        let fetchers: Vec<JoinHandle<()>> = (0..self.config.download_concurrency)
            .map(|worker_id| {
                let worker = FetchWorker {
                    worker_id,
                    state: state.clone(),
                    source: self.source.clone(),
                    known: known.clone(),
                    items: item_tx.clone(),
                    errors: error_tx.clone(),
                    transient_error_budget: self.config.transient_error_budget,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        // The queue closes for persist workers once the last fetch worker drops its sender.
        drop(item_tx);
        drop(error_tx);

        let persisters: Vec<JoinHandle<()>> = (0..self.config.persist_concurrency)
            .map(|worker_id| {
                let worker = PersistWorker {
                    worker_id,
                    state: state.clone(),
                    items: item_rx.clone(),
                    normalizer: self.normalizer.clone(),
                    store: self.store.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        join_workers("fetch", fetchers).await;
        join_workers("persist", persisters).await;
        if let Err(err) = reporter.await {
            tracing::error!("Fetch error reporter failed: {}", err);
        }

        let newly_ingested = state.ingested.load(Ordering::SeqCst);
        match self.store.flush().await {
            Ok(0) => {}
            Ok(flushed) => tracing::info!("Final flush wrote {} comics", flushed),
            Err(err @ StoreError::Index { .. }) => {
                tracing::error!("Index rebuild after final flush failed: {}", err);
                state.record_store_failure(&err).await;
            }
            Err(source) => {
                tracing::error!("Final flush failed: {}", source);
                return Err(PipelineError::FinalFlush {
                    newly_ingested,
                    source,
                });
            }
        }

        let report = RunReport {
            termination: state.termination(),
            newly_ingested,
            total_known: known.len() + newly_ingested,
            transient_errors: state.transient_errors.load(Ordering::SeqCst),
            store_failures: state.store_failures.load(Ordering::SeqCst),
            last_store_failure: state.last_store_failure.lock().await.clone(),
        };

        tracing::info!(
            "Ingestion run finished ({:?}): {} new, {} total",
            report.termination,
            report.newly_ingested,
            report.total_known
        );
        Ok(report)
    }
}

/// Shared, run-scoped state. Dropped when the run ends.
struct RunState {
    /// Next fresh id to hand out.
    next_id: AtomicU64,
    /// Ids below the stored maximum that are still missing.
    gaps: Mutex<VecDeque<u64>>,
    /// Not-found responses since the last successful fetch, across all workers.
    consecutive_not_found: AtomicUsize,
    transient_errors: AtomicUsize,
    ingested: AtomicUsize,
    store_failures: AtomicUsize,
    last_store_failure: Mutex<Option<String>>,
    exhaustion: Mutex<ExhaustionTracker>,
    /// Child of the external token; cancelled on any termination cause.
    shutdown: CancellationToken,
    /// First termination cause wins.
    termination: OnceLock<Termination>,
}

enum Claim {
    Gap(u64),
    Fresh(u64),
}

impl RunState {
    fn new(
        max_id: u64,
        gaps: VecDeque<u64>,
        not_found_budget: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(max_id + 1),
            gaps: Mutex::new(gaps),
            consecutive_not_found: AtomicUsize::new(0),
            transient_errors: AtomicUsize::new(0),
            ingested: AtomicUsize::new(0),
            store_failures: AtomicUsize::new(0),
            last_store_failure: Mutex::new(None),
            exhaustion: Mutex::new(ExhaustionTracker::new(max_id, not_found_budget)),
            shutdown,
            termination: OnceLock::new(),
        }
    }

    async fn claim(&self) -> Claim {
        if let Some(id) = self.gaps.lock().await.pop_front() {
            return Claim::Gap(id);
        }
        Claim::Fresh(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn stop(&self, cause: Termination) {
        if self.termination.set(cause).is_ok() {
            tracing::info!("Stopping ingestion: {:?}", cause);
        }
        self.shutdown.cancel();
    }

    fn termination(&self) -> Termination {
        self.termination
            .get()
            .copied()
            .unwrap_or(Termination::Cancelled)
    }

    async fn record_store_failure(&self, err: &StoreError) {
        self.store_failures.fetch_add(1, Ordering::SeqCst);
        *self.last_store_failure.lock().await = Some(err.to_string());
    }
}

/// Decides when the id space is exhausted.
///
/// Workers claim ids out of order, so a shared "consecutive misses" counter can trip on
/// misses scattered between hits. Instead the tracker walks up from `high_water + 1`,
/// where `high_water` is the highest id fetched so far (or the stored maximum at startup),
/// and requires `budget` misses with nothing unresolved in between. Ids that failed
/// transiently are holes: they neither count as misses nor block the walk.
#[derive(Debug)]
pub(crate) struct ExhaustionTracker {
    high_water: u64,
    budget: u64,
    misses: BTreeSet<u64>,
    holes: BTreeSet<u64>,
}

impl ExhaustionTracker {
    pub(crate) fn new(high_water: u64, budget: u64) -> Self {
        Self {
            high_water,
            budget: budget.max(1),
            misses: BTreeSet::new(),
            holes: BTreeSet::new(),
        }
    }

    pub(crate) fn record_hit(&mut self, id: u64) {
        if id > self.high_water {
            self.high_water = id;
            self.misses = self.misses.split_off(&(id + 1));
            self.holes = self.holes.split_off(&(id + 1));
        }
    }

    /// Records a miss and reports whether the budget is now met.
    pub(crate) fn record_miss(&mut self, id: u64) -> bool {
        if id > self.high_water {
            self.misses.insert(id);
        }
        self.is_exhausted()
    }

    /// Records a transient failure and reports whether the budget is now met.
    pub(crate) fn record_hole(&mut self, id: u64) -> bool {
        if id > self.high_water {
            self.holes.insert(id);
        }
        self.is_exhausted()
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        let mut found = 0;
        let mut id = self.high_water + 1;
        loop {
            if self.misses.contains(&id) {
                found += 1;
                if found == self.budget {
                    return true;
                }
            } else if !self.holes.contains(&id) {
                return false;
            }
            id += 1;
        }
    }
}

struct FetchWorker {
    worker_id: usize,
    state: Arc<RunState>,
    source: Arc<dyn Source>,
    known: Arc<HashSet<u64>>,
    items: mpsc::Sender<SourceRecord>,
    errors: mpsc::UnboundedSender<FetchError>,
    transient_error_budget: usize,
}

impl FetchWorker {
    async fn run(self) {
        tracing::debug!("Fetch worker {} started", self.worker_id);

        loop {
            if self.state.shutdown.is_cancelled() {
                self.state.stop(Termination::Cancelled);
                break;
            }

            let (id, is_gap) = match self.state.claim().await {
                Claim::Gap(id) => (id, true),
                Claim::Fresh(id) => (id, false),
            };

            match self.source.fetch(id).await {
                Ok(record) => {
                    if !is_gap {
                        self.state.exhaustion.lock().await.record_hit(id);
                    }
                    self.state.consecutive_not_found.store(0, Ordering::SeqCst);

                    if self.known.contains(&record.num) {
                        tracing::debug!("Comic {} is already stored, skipping", record.num);
                        continue;
                    }

                    // Sent even after shutdown: a fetched record is never dropped.
                    if self.items.send(record).await.is_err() {
                        tracing::error!(
                            "Fetch worker {}: persist side is gone, dropping comic {}",
                            self.worker_id,
                            id
                        );
                        self.state.stop(Termination::Cancelled);
                        break;
                    }
                }
                Err(err @ FetchError::NotFound { .. }) => {
                    let misses = self
                        .state
                        .consecutive_not_found
                        .fetch_add(1, Ordering::SeqCst)
                        + 1;
                    tracing::debug!("{} ({} consecutive)", err, misses);

                    if !is_gap && self.state.exhaustion.lock().await.record_miss(id) {
                        self.state.stop(Termination::Exhausted);
                    }
                }
                Err(err) => {
                    let count = self.state.transient_errors.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = self.errors.send(err);

                    if count >= self.transient_error_budget {
                        tracing::warn!("Max error count reached, shutting down");
                        self.state.stop(Termination::ErrorBudgetExceeded);
                    } else if !is_gap && self.state.exhaustion.lock().await.record_hole(id) {
                        self.state.stop(Termination::Exhausted);
                    }
                }
            }
        }

        tracing::debug!("Fetch worker {} stopped", self.worker_id);
    }
}

struct PersistWorker {
    worker_id: usize,
    state: Arc<RunState>,
    items: Arc<Mutex<mpsc::Receiver<SourceRecord>>>,
    normalizer: Arc<Normalizer>,
    store: Arc<Store>,
}

impl PersistWorker {
    async fn run(self) {
        tracing::debug!("Persist worker {} started", self.worker_id);

        loop {
            let next = self.items.lock().await.recv().await;
            let Some(record) = next else {
                break;
            };

            let item = record.into_item(&self.normalizer);
            let id = item.id;
            self.state.ingested.fetch_add(1, Ordering::SeqCst);

            match self.store.append(item).await {
                Ok(AppendOutcome::Buffered { pending }) => {
                    tracing::debug!("Buffered comic {} ({} pending)", id, pending);
                }
                Ok(AppendOutcome::Flushed { flushed, total }) => {
                    tracing::debug!(
                        "Persist worker {} flushed {} comics ({} stored)",
                        self.worker_id,
                        flushed,
                        total
                    );
                }
                Err(err) => {
                    // The item stays buffered; the next flush retries it.
                    tracing::error!("Error saving comic {}: {}", id, err);
                    self.state.record_store_failure(&err).await;
                }
            }
        }

        tracing::debug!("Persist worker {} stopped", self.worker_id);
    }
}

async fn report_fetch_errors(mut errors: mpsc::UnboundedReceiver<FetchError>) {
    while let Some(err) = errors.recv().await {
        tracing::warn!("Error fetching comic: {}", err);
    }
}

async fn join_workers(kind: &str, handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!("A {} worker terminated abnormally: {}", kind, err);
        }
    }
}
