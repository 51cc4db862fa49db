//! Update Scheduling
//!
//! Wraps the pipeline so that at most one ingestion run is active at a time, whether it
//! was requested over HTTP or by the periodic updater.

use super::pipeline::Pipeline;
use super::types::{PipelineError, RunReport};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct IngestService {
    pipeline: Pipeline,
    /// Held for the duration of a run.
    run_lock: Mutex<()>,
    /// Process-wide shutdown signal; every run observes it.
    shutdown: CancellationToken,
}

impl IngestService {
    pub fn new(pipeline: Pipeline, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            run_lock: Mutex::new(()),
            shutdown,
        })
    }

    /// Starts a run unless one is already active. `None` means busy.
    pub async fn try_update(&self) -> Option<Result<RunReport, PipelineError>> {
        let _guard = self.run_lock.try_lock().ok()?;
        Some(self.pipeline.run(&self.shutdown).await)
    }

    /// Waits for any active run, then runs.
    pub async fn update(&self) -> Result<RunReport, PipelineError> {
        let _guard = self.run_lock.lock().await;
        self.pipeline.run(&self.shutdown).await
    }

    /// Spawns the periodic updater. The first run happens one `interval` after start.
    pub fn spawn_scheduler(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Scheduled updates every {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.update().await {
                    Ok(report) => tracing::info!(
                        "Scheduled update: {} new, {} total",
                        report.newly_ingested,
                        report.total_known
                    ),
                    Err(err) => tracing::error!("Error during scheduled update: {}", err),
                }
            }

            tracing::info!("Scheduled updates stopped");
        })
    }
}
