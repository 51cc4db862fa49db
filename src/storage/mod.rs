//! Storage Module
//!
//! Durable, crash-consistent persistence for ingested comics and the inverted index
//! derived from them.
//!
//! ## Core Concepts
//! - **Collection**: every ingested `Item`, stored as one JSON array and replaced wholesale.
//! - **Write Buffer**: freshly ingested items wait in memory until a flush merges them in.
//! - **Atomic Replace**: artifacts are written to a sibling temp file and renamed over the
//!   existing file, so a crash leaves either the old or the new document, never a torn one.
//! - **Index**: term -> postings, rebuilt from the whole collection after every flush.
//!
//! Ids are not deduplicated here. Re-ingesting an id appends a second record; callers
//! that care (the ingestion pipeline) skip ids they already know.

pub mod index;
pub mod store;
pub mod types;
