//! Ingestion Module Tests
//!
//! Drives the pipeline against an in-memory source.
//!
//! ## Test Scopes
//! - **Termination**: exhaustion, error budget, cancellation.
//! - **Id Selection**: gap backfill, skipping stored ids, holes in the source.
//! - **Durability**: everything fetched is persisted, final flush failures surface.
//! - **Service / Handlers**: single active run, HTTP status mapping.
//! - **HTTP Source**: status and payload mapping against a local axum server.

#[cfg(test)]
mod tests {
    use crate::ingestion::handlers::handle_update;
    use crate::ingestion::pipeline::{ExhaustionTracker, Pipeline};
    use crate::ingestion::service::IngestService;
    use crate::ingestion::source::{HttpSource, Source};
    use crate::ingestion::types::{
        FetchError, PipelineConfig, PipelineError, SourceRecord, Termination, UpdateResponse,
    };
    use crate::search::normalizer::Normalizer;
    use crate::storage::store::Store;
    use crate::storage::types::Item;

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Extension, Json, Router};
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{Notify, Semaphore};
    use tokio_util::sync::CancellationToken;

    /// Serves ids `1..=available`, minus `missing`, from memory.
    struct FakeSource {
        available: u64,
        missing: HashSet<u64>,
        transient: HashSet<u64>,
        /// Id requested -> id carried by the payload.
        aliases: HashMap<u64, u64>,
        delay: Option<Duration>,
        gate: Option<Arc<Semaphore>>,
        entered: Arc<Notify>,
        fetched: std::sync::Mutex<Vec<u64>>,
    }

    impl FakeSource {
        fn new(available: u64) -> Self {
            Self {
                available,
                missing: HashSet::new(),
                transient: HashSet::new(),
                aliases: HashMap::new(),
                delay: None,
                gate: None,
                entered: Arc::new(Notify::new()),
                fetched: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<u64> {
            let mut ids = self.fetched.lock().unwrap().clone();
            ids.sort_unstable();
            ids
        }
    }

    #[async_trait]
    impl Source for FakeSource {
        async fn fetch(&self, id: u64) -> Result<SourceRecord, FetchError> {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.map_err(|err| FetchError::Transient {
                    id,
                    reason: err.to_string(),
                })?;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.transient.contains(&id) {
                return Err(FetchError::Transient {
                    id,
                    reason: "connection reset".to_string(),
                });
            }
            if id > self.available || self.missing.contains(&id) {
                return Err(FetchError::NotFound { id });
            }

            let num = self.aliases.get(&id).copied().unwrap_or(id);
            self.fetched.lock().unwrap().push(num);
            Ok(SourceRecord {
                num,
                img: format!("https://imgs.example.com/{}.png", num),
                title: format!("Comic {}", num),
                safe_title: format!("Comic {}", num),
                transcript: "A cat chases a dog".to_string(),
                alt: "Dogs never learn".to_string(),
            })
        }
    }

    fn config(download: usize, not_found: usize, errors: usize) -> PipelineConfig {
        PipelineConfig {
            download_concurrency: download,
            persist_concurrency: 2,
            not_found_budget: not_found,
            transient_error_budget: errors,
            handoff_capacity: download,
            backfill_gaps: true,
        }
    }

    fn pipeline(config: PipelineConfig, source: Arc<FakeSource>, store: Arc<Store>) -> Pipeline {
        Pipeline::new(config, source, Arc::new(Normalizer::english()), store)
    }

    async fn seeded_store(path: &Path, ids: &[u64]) -> Arc<Store> {
        let store = Store::new(path, 3);
        for id in ids {
            store
                .append(Item {
                    id: *id,
                    media_ref: format!("https://imgs.example.com/{}.png", id),
                    keywords: vec!["seed".to_string()],
                })
                .await
                .unwrap();
        }
        store.flush().await.unwrap();
        Arc::new(store)
    }

    async fn stored_ids(store: &Store) -> Vec<u64> {
        let mut ids: Vec<u64> = store.get_all().await.unwrap().iter().map(|i| i.id).collect();
        ids.sort_unstable();
        ids
    }

    // ============================================================
    // TERMINATION TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_until_exhausted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let source = Arc::new(FakeSource::new(24));

        let report = pipeline(config(4, 5, 2), source, store.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.newly_ingested, 24);
        assert_eq!(report.total_known, 24);
        assert_eq!(report.transient_errors, 0);
        assert_eq!(stored_ids(&store).await, (1..=24).collect::<Vec<u64>>());
        assert_eq!(store.pending().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_second_run_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let source = Arc::new(FakeSource::new(12));
        let pipeline = pipeline(config(3, 4, 2), source, store.clone());

        pipeline.run(&CancellationToken::new()).await.unwrap();
        let report = pipeline.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.newly_ingested, 0);
        assert_eq!(report.total_known, 12);
        assert_eq!(store.get_all().await.unwrap().len(), 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_holes_shorter_than_budget_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let mut source = FakeSource::new(20);
        source.missing = [5, 6].into_iter().collect();

        let report = pipeline(config(4, 3, 2), Arc::new(source), store.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.termination, Termination::Exhausted);
        let expected: Vec<u64> = (1..=20).filter(|id| *id != 5 && *id != 6).collect();
        assert_eq!(stored_ids(&store).await, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_error_budget_stops_run() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let mut source = FakeSource::new(1_000);
        source.transient = (10..=1_000).collect();

        let report = pipeline(config(4, 5, 3), Arc::new(source), store.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.termination, Termination::ErrorBudgetExceeded);
        assert!(report.transient_errors >= 3);
        // Everything below the failing range was claimed first and still lands on disk.
        assert_eq!(stored_ids(&store).await, (1..=9).collect::<Vec<u64>>());
        assert_eq!(report.newly_ingested, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_isolated_transient_error_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let mut source = FakeSource::new(10);
        source.transient = [3].into_iter().collect();

        let report = pipeline(config(2, 3, 3), Arc::new(source), store.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.transient_errors, 1);
        assert!(!stored_ids(&store).await.contains(&3));
        assert_eq!(report.newly_ingested, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_transient_error_at_the_end_still_exhausts() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let mut source = FakeSource::new(10);
        source.transient = [11].into_iter().collect();

        let run = pipeline(config(1, 3, 5), Arc::new(source), store.clone());
        let token = CancellationToken::new();
        let report = tokio::time::timeout(Duration::from_secs(5), run.run(&token))
            .await
            .expect("run must terminate")
            .unwrap();

        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.transient_errors, 1);
        assert_eq!(stored_ids(&store).await, (1..=10).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scattered_transient_errors_past_the_end_still_exhaust() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let mut source = FakeSource::new(10);
        source.transient = [11, 13].into_iter().collect();

        let run = pipeline(config(4, 3, 10), Arc::new(source), store.clone());
        let token = CancellationToken::new();
        let report = tokio::time::timeout(Duration::from_secs(5), run.run(&token))
            .await
            .expect("run must terminate")
            .unwrap();

        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.newly_ingested, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_persists_everything_fetched() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let mut source = FakeSource::new(100_000);
        source.delay = Some(Duration::from_millis(5));
        let source = Arc::new(source);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            canceller.cancel();
        });

        let report = pipeline(config(4, 5, 2), source.clone(), store.clone())
            .run(&token)
            .await
            .unwrap();

        assert_eq!(report.termination, Termination::Cancelled);
        let fetched = source.fetched();
        assert!(!fetched.is_empty());
        assert_eq!(stored_ids(&store).await, fetched);
        assert_eq!(report.newly_ingested, fetched.len());
        assert_eq!(store.pending().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let source = Arc::new(FakeSource::new(10));

        let token = CancellationToken::new();
        token.cancel();
        let report = pipeline(config(2, 5, 2), source.clone(), store.clone())
            .run(&token)
            .await
            .unwrap();

        assert_eq!(report.termination, Termination::Cancelled);
        assert_eq!(report.newly_ingested, 0);
        assert!(source.fetched().is_empty());
        assert!(!store.db_path().exists());
    }

    // ============================================================
    // ID SELECTION TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gaps_below_maximum_are_backfilled() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir.path().join("database.json"), &[1, 2, 5]).await;
        let source = Arc::new(FakeSource::new(7));

        let report = pipeline(config(2, 3, 2), source.clone(), store.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.newly_ingested, 4);
        assert_eq!(report.total_known, 7);
        assert_eq!(stored_ids(&store).await, (1..=7).collect::<Vec<u64>>());
        assert_eq!(source.fetched(), vec![3, 4, 6, 7]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gaps_ignored_without_backfill() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir.path().join("database.json"), &[1, 2, 5]).await;
        let source = Arc::new(FakeSource::new(7));
        let mut config = config(2, 3, 2);
        config.backfill_gaps = false;

        let report = pipeline(config, source, store.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.newly_ingested, 2);
        assert_eq!(stored_ids(&store).await, vec![1, 2, 5, 6, 7]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stored_ids_are_not_appended_again() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir.path().join("database.json"), &[1, 2, 3]).await;
        let mut source = FakeSource::new(6);
        // Comic 4's payload claims to be comic 2.
        source.aliases = [(4, 2)].into_iter().collect();

        let report = pipeline(config(2, 3, 2), Arc::new(source), store.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.newly_ingested, 2);
        assert_eq!(stored_ids(&store).await, vec![1, 2, 3, 5, 6]);
    }

    // ============================================================
    // DURABILITY TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_final_flush_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("missing").join("database.json"), 100));
        let source = Arc::new(FakeSource::new(4));

        let result = pipeline(config(2, 3, 2), source, store.clone())
            .run(&CancellationToken::new())
            .await;

        match result {
            Err(PipelineError::FinalFlush { newly_ingested, .. }) => assert_eq!(newly_ingested, 4),
            other => panic!("expected a final flush failure, got {:?}", other),
        }
        assert_eq!(store.pending().await, 4, "Unpersisted items stay buffered");
    }

    #[tokio::test]
    async fn test_corrupt_collection_fails_before_fetching() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("database.json");
        std::fs::write(&db, "not json").unwrap();
        let store = Arc::new(Store::new(&db, 3));
        let source = Arc::new(FakeSource::new(4));

        let result = pipeline(config(2, 3, 2), source.clone(), store)
            .run(&CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipelineError::Init(_))));
        assert!(source.fetched().is_empty());
    }

    #[test]
    fn test_record_text_feeds_keywords() {
        let record = SourceRecord {
            num: 7,
            img: "https://imgs.example.com/7.png".to_string(),
            title: String::new(),
            safe_title: String::new(),
            transcript: "Cats".to_string(),
            alt: "dogs".to_string(),
        };

        let item = record.into_item(&Normalizer::english());

        assert_eq!(item.id, 7);
        assert_eq!(item.media_ref, "https://imgs.example.com/7.png");
        assert_eq!(item.keywords, vec!["cat", "dog"]);
    }

    #[test]
    fn test_source_record_ignores_unknown_fields() {
        let json = r#"{"month": "4", "num": 614, "link": "", "year": "2009",
            "safe_title": "Woodpecker", "transcript": "",
            "alt": "If you don't have an extension cord",
            "img": "https://imgs.xkcd.com/comics/woodpecker.png",
            "title": "Woodpecker", "day": "24"}"#;

        let record: SourceRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.num, 614);
        assert_eq!(record.safe_title, "Woodpecker");
    }

    // ============================================================
    // EXHAUSTION TRACKER TESTS
    // ============================================================

    #[test]
    fn test_tracker_needs_full_window() {
        let mut tracker = ExhaustionTracker::new(0, 3);

        assert!(!tracker.record_miss(1));
        assert!(!tracker.record_miss(3));
        assert!(tracker.record_miss(2));
    }

    #[test]
    fn test_tracker_hit_moves_window() {
        let mut tracker = ExhaustionTracker::new(0, 3);

        tracker.record_miss(1);
        tracker.record_miss(3);
        tracker.record_hit(2);

        assert!(!tracker.is_exhausted());
        assert!(!tracker.record_miss(4));
        assert!(tracker.record_miss(5));
    }

    #[test]
    fn test_tracker_ignores_misses_below_high_water() {
        let mut tracker = ExhaustionTracker::new(10, 2);

        assert!(!tracker.record_miss(5));
        assert!(!tracker.record_miss(11));
        assert!(tracker.record_miss(12));
    }

    #[test]
    fn test_tracker_skips_transient_holes() {
        let mut tracker = ExhaustionTracker::new(0, 3);

        assert!(!tracker.record_hole(1));
        assert!(!tracker.record_miss(2));
        assert!(!tracker.record_miss(4));
        assert!(tracker.record_miss(3));
    }

    #[test]
    fn test_tracker_hole_can_complete_window() {
        let mut tracker = ExhaustionTracker::new(5, 2);

        assert!(!tracker.record_miss(6));
        assert!(!tracker.record_miss(8));
        assert!(tracker.record_hole(7));
    }

    #[test]
    fn test_tracker_hit_clears_holes() {
        let mut tracker = ExhaustionTracker::new(0, 2);

        tracker.record_hole(1);
        tracker.record_hit(2);
        tracker.record_hole(3);

        assert!(!tracker.record_miss(4));
        assert!(tracker.record_miss(5));
    }

    #[test]
    fn test_tracker_late_hit_below_high_water_is_harmless() {
        let mut tracker = ExhaustionTracker::new(0, 2);

        tracker.record_hit(8);
        tracker.record_hit(4);
        tracker.record_miss(9);

        assert!(tracker.record_miss(10));
    }

    // ============================================================
    // SERVICE / HANDLER TESTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_update_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let gate = Arc::new(Semaphore::new(0));
        let mut source = FakeSource::new(3);
        source.gate = Some(gate.clone());
        let source = Arc::new(source);
        let entered = source.entered.clone();

        let service = IngestService::new(
            pipeline(config(1, 2, 2), source, store),
            CancellationToken::new(),
        );

        let running = {
            let service = service.clone();
            tokio::spawn(async move { service.try_update().await })
        };
        entered.notified().await;

        assert!(service.try_update().await.is_none());
        let response = handle_update(Extension(service.clone())).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        gate.add_permits(10);
        let report = running.await.unwrap().unwrap().unwrap();
        assert_eq!(report.newly_ingested, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_handler_reports_counts() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir.path().join("database.json"), &[1, 2]).await;
        let service = IngestService::new(
            pipeline(config(2, 3, 2), Arc::new(FakeSource::new(5)), store),
            CancellationToken::new(),
        );

        let response = handle_update(Extension(service)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let update: UpdateResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(update.newly_ingested, 3);
        assert_eq!(update.total_known, 5);
        assert_eq!(update.termination, Termination::Exhausted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_handler_error_budget_is_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let mut source = FakeSource::new(50);
        source.transient = (1..=50).collect();
        let service = IngestService::new(
            pipeline(config(2, 3, 2), Arc::new(source), store),
            CancellationToken::new(),
        );

        let response = handle_update(Extension(service)).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(dir.path().join("database.json"), 3));
        let shutdown = CancellationToken::new();
        let service = IngestService::new(
            pipeline(config(1, 2, 2), Arc::new(FakeSource::new(2)), store),
            shutdown.clone(),
        );

        let scheduler = service.spawn_scheduler(Duration::from_secs(3_600));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), scheduler)
            .await
            .unwrap()
            .unwrap();
    }

    // ============================================================
    // HTTP SOURCE TESTS
    // ============================================================

    async fn comic_route(axum::extract::Path(id): axum::extract::Path<u64>) -> Response {
        match id {
            1 => Json(serde_json::json!({
                "num": 1,
                "img": "https://imgs.example.com/1.png",
                "safe_title": "Barrel",
                "transcript": "A boy sits in a barrel",
                "alt": "Don't we all."
            }))
            .into_response(),
            2 => StatusCode::NOT_FOUND.into_response(),
            3 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            4 => (StatusCode::OK, "<html>maintenance</html>").into_response(),
            _ => Json(serde_json::json!({ "num": 99, "img": "https://imgs.example.com/99.png" }))
                .into_response(),
        }
    }

    /// Serves a handful of canned comic responses on an ephemeral port.
    async fn spawn_comic_server() -> String {
        let app = Router::new().route("/:id/info.0.json", get(comic_route));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn local_source(base: &str) -> HttpSource {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpSource::with_client(client, base)
    }

    #[test]
    fn test_comic_url_trims_trailing_slash() {
        let source = HttpSource::new("https://xkcd.com/", Duration::from_secs(1)).unwrap();

        assert_eq!(source.comic_url(614), "https://xkcd.com/614/info.0.json");
    }

    #[tokio::test]
    async fn test_http_source_decodes_comic() {
        let base = spawn_comic_server().await;
        let source = local_source(&base);

        let record = source.fetch(1).await.unwrap();

        assert_eq!(record.num, 1);
        assert_eq!(record.img, "https://imgs.example.com/1.png");
        assert_eq!(record.safe_title, "Barrel");
        assert!(record.title.is_empty());
        assert_eq!(record.text(), "A boy sits in a barrel Don't we all.");
    }

    #[tokio::test]
    async fn test_http_source_maps_missing_comic_to_not_found() {
        let base = spawn_comic_server().await;
        let source = local_source(&base);

        assert_eq!(source.fetch(2).await, Err(FetchError::NotFound { id: 2 }));
    }

    #[tokio::test]
    async fn test_http_source_maps_failures_to_transient() {
        let base = spawn_comic_server().await;
        let source = local_source(&base);

        // Server error status.
        assert!(matches!(
            source.fetch(3).await,
            Err(FetchError::Transient { id: 3, .. })
        ));
        // Body that is not a comic.
        assert!(matches!(
            source.fetch(4).await,
            Err(FetchError::Transient { id: 4, .. })
        ));
        // Payload for a different comic.
        assert!(matches!(
            source.fetch(5).await,
            Err(FetchError::Transient { id: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_http_source_unreachable_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let source = local_source(&format!("http://{}", addr));

        assert!(matches!(
            source.fetch(1).await,
            Err(FetchError::Transient { id: 1, .. })
        ));
    }
}
