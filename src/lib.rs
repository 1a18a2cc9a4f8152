//! Feed Cache - a periodic RSS fetcher with date-bucketed JSON caches
//!
//! Each configured source is polled on its own loop. New entries are
//! normalized, deduplicated by title within their publish date, and merged
//! into a per-source cache file that a small read-only web interface serves.

pub mod config;
pub mod fetcher;
pub mod merge;
pub mod normalize;
pub mod query;
pub mod routes;
pub mod store;
