//! Comic Indexer Library
//!
//! This library crate defines the core modules of the comic ingestion and search server.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`ingestion`**: The data intake pipeline. Fetches comics from the remote source with
//!   concurrent workers, under not-found and error budgets, with cooperative cancellation.
//! - **`storage`**: The durable layer. A buffered, crash-consistent JSON collection and the
//!   inverted index rebuilt from it after each flush.
//! - **`search`**: The retrieval logic. Text normalization (stop-words, stemming) and
//!   hit-count ranking of comics for a free-text query.
//! - **`config`**: Command-line and environment configuration.

pub mod config;
pub mod ingestion;
pub mod search;
pub mod storage;
