//! Runtime Configuration
//!
//! Command-line flags, each with an environment variable fallback. The core modules never
//! read flags themselves; `main` turns this struct into the values they take.

use crate::ingestion::types::PipelineConfig;
use crate::storage::store::DEFAULT_FLUSH_THRESHOLD;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "comic-indexer", version, about = "Comic ingestion and keyword search server")]
pub struct Config {
    /// Base URL of the comic source.
    #[arg(long, env = "SOURCE_URL", default_value = "https://xkcd.com")]
    pub source_url: String,

    /// Collection artifact.
    #[arg(long, env = "DB_FILE", default_value = "database.json")]
    pub db_file: PathBuf,

    /// Index artifact.
    #[arg(long, env = "INDEX_FILE", default_value = "index.json")]
    pub index_file: PathBuf,

    /// Newline-separated stop-word list. The built-in English list is used when absent.
    #[arg(long, env = "STOPWORDS_FILE")]
    pub stopwords_file: Option<PathBuf>,

    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Overrides the port part of `--bind`.
    #[arg(short = 'p', long, env = "COMIC_INDEXER_PORT")]
    pub port: Option<u16>,

    /// Fetch workers; zero or less means one per CPU.
    #[arg(long, env = "PARALLEL", default_value_t = 0, allow_negative_numbers = true)]
    pub parallel: i64,

    #[arg(long, env = "PERSIST_WORKERS", default_value_t = 2)]
    pub persist_workers: usize,

    #[arg(long, env = "NOT_FOUND_BUDGET", default_value_t = 5)]
    pub not_found_budget: usize,

    #[arg(long, env = "ERROR_BUDGET", default_value_t = 2)]
    pub error_budget: usize,

    #[arg(long, env = "FLUSH_THRESHOLD", default_value_t = DEFAULT_FLUSH_THRESHOLD)]
    pub flush_threshold: usize,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Period of the background update; 0 disables it.
    #[arg(long, env = "UPDATE_INTERVAL_SECS", default_value_t = 86_400)]
    pub update_interval_secs: u64,

    #[arg(long, env = "BACKFILL_GAPS", default_value_t = true, action = clap::ArgAction::Set)]
    pub backfill_gaps: bool,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        match self.port {
            Some(port) => SocketAddr::new(self.bind.ip(), port),
            None => self.bind,
        }
    }

    pub fn download_concurrency(&self) -> usize {
        if self.parallel > 0 {
            self.parallel as usize
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let download_concurrency = self.download_concurrency();
        PipelineConfig {
            download_concurrency,
            persist_concurrency: self.persist_workers,
            not_found_budget: self.not_found_budget,
            transient_error_budget: self.error_budget,
            handoff_capacity: download_concurrency,
            backfill_gaps: self.backfill_gaps,
        }
        .normalized()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn update_interval(&self) -> Option<Duration> {
        (self.update_interval_secs > 0).then(|| Duration::from_secs(self.update_interval_secs))
    }
}
