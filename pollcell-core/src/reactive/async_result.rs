//! Async Results
//!
//! [`AsyncResult`] is the value every cell holds: the state of an asynchronous
//! operation that is either still running, has completed with a value, or has
//! failed.

use crate::error::CellError;

/// The state of an asynchronous value.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncResult<T> {
    /// No value is known yet.
    Pending,

    /// The operation finished with a value.
    Completed(T),

    /// The operation failed.
    Errored(CellError),
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::Pending
    }
}

impl<T> AsyncResult<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored(_))
    }

    /// The completed value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// The error, if any.
    pub fn error(&self) -> Option<&CellError> {
        match self {
            Self::Errored(error) => Some(error),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> AsyncResult<&T> {
        match self {
            Self::Pending => AsyncResult::Pending,
            Self::Completed(value) => AsyncResult::Completed(value),
            Self::Errored(error) => AsyncResult::Errored(error.clone()),
        }
    }

    /// Transform the completed value, leaving pending and errored untouched.
    pub fn map<U, F>(self, f: F) -> AsyncResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Pending => AsyncResult::Pending,
            Self::Completed(value) => AsyncResult::Completed(f(value)),
            Self::Errored(error) => AsyncResult::Errored(error),
        }
    }

    /// Chain another asynchronous step on the completed value.
    pub fn and_then<U, F>(self, f: F) -> AsyncResult<U>
    where
        F: FnOnce(T) -> AsyncResult<U>,
    {
        match self {
            Self::Pending => AsyncResult::Pending,
            Self::Completed(value) => f(value),
            Self::Errored(error) => AsyncResult::Errored(error),
        }
    }

    /// `None` while pending, otherwise the settled outcome.
    pub fn into_result(self) -> Option<Result<T, CellError>> {
        match self {
            Self::Pending => None,
            Self::Completed(value) => Some(Ok(value)),
            Self::Errored(error) => Some(Err(error)),
        }
    }
}

impl<T, E> From<Result<T, E>> for AsyncResult<T>
where
    E: Into<CellError>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(error) => Self::Errored(error.into()),
        }
    }
}
