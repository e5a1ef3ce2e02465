//! Error types for FANIN operations

use thiserror::Error;

/// Why a caller's [`RequestContext`](crate::RequestContext) ended.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum ContextError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Error returned to a caller waiting on a coalesced lookup.
///
/// `E` is the bulk fetch function's own error type. It is cloned into every
/// waiter of a failed batch, so every caller observes the identical error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError<E> {
    /// The bulk fetch for the caller's batch failed.
    #[error("bulk fetch failed: {0}")]
    Fetch(E),

    /// The caller's own context ended before the result arrived.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The dispatch task for the caller's batch ended without a result.
    #[error("batch dispatch abandoned before completion")]
    Abandoned,
}

impl<E> LoadError<E> {
    /// Returns the bulk fetch error, if that is what this is.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            Self::Fetch(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the caller's context ended first.
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Map the fetch error type, leaving other variants untouched.
    pub fn map_fetch<F>(self, f: impl FnOnce(E) -> F) -> LoadError<F> {
        match self {
            Self::Fetch(e) => LoadError::Fetch(f(e)),
            Self::Context(e) => LoadError::Context(e),
            Self::Abandoned => LoadError::Abandoned,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Result type alias for coalesced lookups.
pub type LoadResult<T, E> = Result<T, LoadError<E>>;

// =============================================================================
// TESTS
// =============================================================================
