//! Ingestion Service Module
//!
//! Pulls sequentially numbered comics from the remote source and persists them, with
//! their normalized keywords, into the store.
//!
//! ## Workflow
//! 1. **Download**: Fetch workers claim ids and fetch comics concurrently.
//! 2. **Handoff**: Fetched records pass through a bounded queue (backpressure).
//! 3. **Process**: Persist workers normalize transcript + alt text into keywords.
//! 4. **Storage**: Items are buffered, flushed atomically and re-indexed in batches.
//!
//! ## Submodules
//! - **`source`**: The `Source` trait and its HTTP implementation.
//! - **`pipeline`**: Worker orchestration, failure budgets and cancellation.
//! - **`service`**: Single-run guard and the periodic updater.
//! - **`handlers`**: HTTP trigger for an update run.
//! - **`types`**: Wire records, configuration and run reports.

pub mod handlers;
pub mod pipeline;
pub mod service;
pub mod source;
pub mod types;

#[cfg(test)]
mod tests;
