//! # tutorflow-cache
//!
//! Memoizes expensive calls (model requests, mostly) by their exact input.
//! The table is a single JSON object on disk, rewritten atomically on every
//! store and read back when a process starts.

pub mod cache;
pub mod error;

pub use cache::ResultCache;
pub use error::{CacheError, Result};
