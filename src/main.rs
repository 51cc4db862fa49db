use axum::{
    routing::{get, post},
    Extension, Router,
};
use clap::Parser;
use comic_indexer::config::Config;
use comic_indexer::ingestion::handlers::handle_update;
use comic_indexer::ingestion::pipeline::Pipeline;
use comic_indexer::ingestion::service::IngestService;
use comic_indexer::ingestion::source::HttpSource;
use comic_indexer::search::engine::SearchEngine;
use comic_indexer::search::handlers::{handle_pics, handle_search};
use comic_indexer::search::normalizer::Normalizer;
use comic_indexer::storage::index::Indexer;
use comic_indexer::storage::store::Store;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    tracing::info!(
        "Using collection {} and index {}",
        config.db_file.display(),
        config.index_file.display()
    );

    // 1. Text normalization:
    let normalizer = Arc::new(match &config.stopwords_file {
        Some(path) => Normalizer::from_stop_word_file(path)?,
        None => Normalizer::english(),
    });

    // 2. Storage layer:
    let indexer = Indexer::new(&config.index_file);
    let store = Arc::new(
        Store::new(&config.db_file, config.flush_threshold).with_indexer(indexer.clone()),
    );

    // 3. Ingestion pipeline:
    let shutdown = CancellationToken::new();
    let source = Arc::new(HttpSource::new(&config.source_url, config.request_timeout())?);
    let pipeline = Pipeline::new(
        config.pipeline_config(),
        source,
        normalizer.clone(),
        store.clone(),
    );
    let ingest = IngestService::new(pipeline, shutdown.clone());

    let engine = Arc::new(SearchEngine::new(normalizer, store, indexer, &config.source_url));

    // 4. Scheduled updates:
    let scheduler = config
        .update_interval()
        .map(|interval| ingest.clone().spawn_scheduler(interval));

    // 5. Shutdown signal:
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Received shutdown signal, finishing in-flight work...");
        signal_token.cancel();
    });

    // 6. HTTP Router:
    let app = Router::new()
        .route("/", get(|| async { "Welcome to the comic indexer!" }))
        .route("/health", get(|| async { "ok" }))
        .route("/update", post(handle_update))
        .route("/pics", get(handle_pics))
        .route("/search", get(handle_search))
        .layer(Extension(ingest))
        .layer(Extension(engine));

    let addr = config.listen_addr();
    tracing::info!("HTTP server listening on {}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.await?;
    }

    tracing::info!("Server exiting");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
