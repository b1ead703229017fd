//! On-disk token cache.

pub mod file;
pub mod key;

use std::path::PathBuf;

pub use file::{TokenCache, default_cache_dir};
pub use key::CacheKey;

/// Token cache failures.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No entry for the requested key.
    #[error("no cached token at '{}'", path.display())]
    NotFound { path: PathBuf },

    /// The entry exists but is not a valid token set.
    #[error("cached token at '{}' is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure other than a missing entry.
    #[error("token cache I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The token set could not be encoded.
    #[error("failed to serialize token set: {0}")]
    Serialize(#[from] serde_json::Error),
}
