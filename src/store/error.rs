use std::error::Error as StdError;

use thiserror::Error;

/// Errors returned by every [`Store`](super::Store) backend.
///
/// Misses and failed conditional writes are ordinary outcomes, not faults:
/// callers are expected to match on them.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key is absent or its entry has expired.
    #[error("cache: key not found")]
    CacheMiss,

    /// A conditional write (add/replace) was refused, or the stored value does
    /// not have the type the caller asked for.
    #[error("cache: not stored")]
    NotStored,

    /// The backend does not implement this operation.
    #[error("cache: operation not supported")]
    Unsupported,

    /// The backend itself failed (connection, pool, protocol).
    #[error("cache backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl CacheError {
    /// Wraps an opaque backend failure.
    pub fn backend<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(source),
        }
    }

    /// Returns `true` for [`CacheError::CacheMiss`].
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::CacheMiss)
    }
}
