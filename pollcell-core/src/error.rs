//! Error Types
//!
//! Every failure in the cache is represented as data: a fetch that rejects or
//! a derived computation that fails ends up as [`CellError`] inside
//! [`AsyncResult::Errored`](crate::reactive::AsyncResult::Errored). Nothing in
//! this crate returns these errors out of `set` or `subscribe`.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Shared, type-erased source error.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors a cell can hold.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CellError {
    /// The underlying fetch task failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A derived computation failed or panicked.
    #[error("compute failed: {0}")]
    Compute(String),

    /// A polling cell was activated outside of any tokio runtime.
    #[error("no tokio runtime available to drive the poll loop")]
    NoRuntime,
}

impl CellError {
    /// Build a [`CellError::Compute`] from anything displayable.
    pub fn compute(message: impl fmt::Display) -> Self {
        Self::Compute(message.to_string())
    }
}

/// The message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// A failed fetch.
///
/// The payload is opaque to the cache: it keeps a message for display and,
/// when built from a concrete error, the original error as its source.
#[derive(Clone)]
pub struct FetchError {
    message: String,
    source: Option<SharedError>,
}

impl FetchError {
    /// Create a fetch error from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a concrete error, keeping it available through `source()`.
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// The human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchError")
            .field("message", &self.message)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for FetchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

// Two fetch errors are equal when they report the same message. Sources are
// opaque and not comparable.
impl PartialEq for FetchError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl From<&str> for FetchError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for FetchError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(error: std::io::Error) -> Self {
        Self::from_error(error)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = FetchError::from(io);

        assert_eq!(err.message(), "refused");
        assert!(err.source().is_some());
        assert!(FetchError::new("plain").source().is_none());
    }

    #[test]
    fn cell_error_display() {
        let err = CellError::from(FetchError::new("backend down"));
        assert_eq!(err.to_string(), "fetch failed: backend down");

        let err = CellError::compute("bad input");
        assert_eq!(err.to_string(), "compute failed: bad input");
    }

    #[test]
    fn fetch_errors_compare_by_message() {
        let a = FetchError::new("boom");
        let b = FetchError::from_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(a, b);
        assert_ne!(a, FetchError::new("other"));
    }
}
