//! Error types for the result cache.

use thiserror::Error;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised while loading or persisting the cache file.
///
/// [`crate::ResultCache::get_or_compute`] never surfaces these; it logs them
/// and falls back to recomputing.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache file is not a JSON object of strings: {0}")]
    Serialization(#[from] serde_json::Error),
}
