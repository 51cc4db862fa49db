//! Search Service Module
//!
//! Resolves free-text queries to a ranked list of comics using the inverted index
//! maintained by the storage layer.
//!
//! ## Responsibilities
//! - **Normalization**: Turning raw transcripts and query strings into stemmed terms.
//! - **Ranking**: Counting postings hits per comic and ordering by hits, then id.
//! - **Retrieval**: Hydrating ranked ids with media references from the collection.
//! - **API**: Exposing search via axum handlers.
//!
//! ## Submodules
//! - **`engine`**: Ranking (`search`, `rank`) and the `SearchEngine` service.
//! - **`handlers`**: HTTP request handlers for the axum web server.
//! - **`normalizer`**: Tokenizing, stop-word filtering and stemming.
//! - **`types`**: Data Transfer Objects (DTOs) for API communication.

pub mod engine;
pub mod handlers;
pub mod normalizer;
pub mod types;
