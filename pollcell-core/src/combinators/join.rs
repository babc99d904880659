//! Joining asynchronous results.
//!
//! # Algebra
//!
//! With the default options, joining `N` results gives:
//!
//! 1. `Errored(e)` if any input is errored, where `e` is the first error in
//!    iteration order. Errors take priority over pending inputs.
//! 2. Otherwise `Pending` if any input is pending.
//! 3. Otherwise `Completed` with every value, in input order. An empty input
//!    joins to an empty completed collection.
//!
//! A single failing input poisons the join until it recovers, so a joined
//! view is never a partial collection unless [`JoinOptions`] asks for one.

use std::hash::Hash;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::reactive::AsyncResult;

/// What a join does with inputs in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// The state propagates to the joined result.
    #[default]
    Bubble,

    /// Inputs in this state are dropped from the joined result.
    FilterOut,
}

/// Per-state policies for [`join_async_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    pub errors: JoinPolicy,
    pub pending: JoinPolicy,
}

impl JoinOptions {
    /// Join whatever has completed, ignoring pending and errored inputs.
    pub fn completed_only() -> Self {
        Self {
            errors: JoinPolicy::FilterOut,
            pending: JoinPolicy::FilterOut,
        }
    }
}

/// Join keyed results with the default (all-or-nothing) algebra.
pub fn join_async<K, T, I>(results: I) -> AsyncResult<IndexMap<K, T>>
where
    K: Hash + Eq,
    I: IntoIterator<Item = (K, AsyncResult<T>)>,
{
    join_async_with(results, JoinOptions::default())
}

/// Join keyed results with explicit policies.
pub fn join_async_with<K, T, I>(results: I, options: JoinOptions) -> AsyncResult<IndexMap<K, T>>
where
    K: Hash + Eq,
    I: IntoIterator<Item = (K, AsyncResult<T>)>,
{
    let results = results.into_iter();
    let mut values = IndexMap::with_capacity(results.size_hint().0);
    let mut pending = false;

    for (key, result) in results {
        match result {
            AsyncResult::Completed(value) => {
                values.insert(key, value);
            }
            AsyncResult::Errored(error) => {
                if options.errors == JoinPolicy::Bubble {
                    return AsyncResult::Errored(error);
                }
            }
            AsyncResult::Pending => {
                if options.pending == JoinPolicy::Bubble {
                    pending = true;
                }
            }
        }
    }

    if pending {
        AsyncResult::Pending
    } else {
        AsyncResult::Completed(values)
    }
}

/// Join a sequence of results into one result of a `Vec`.
pub fn join_all<T, I>(results: I) -> AsyncResult<Vec<T>>
where
    I: IntoIterator<Item = AsyncResult<T>>,
{
    join_async(results.into_iter().enumerate()).map(|values| values.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CellError, FetchError};

    fn error(message: &str) -> CellError {
        CellError::Fetch(FetchError::new(message))
    }

    #[test]
    fn pending_wins_over_completed() {
        let joined = join_async(vec![
            ("a", AsyncResult::Completed(1)),
            ("b", AsyncResult::Pending),
        ]);
        assert_eq!(joined, AsyncResult::Pending);
    }

    #[test]
    fn error_wins_over_completed() {
        let joined = join_async(vec![
            ("a", AsyncResult::Completed(1)),
            ("b", AsyncResult::Errored(error("E"))),
        ]);
        assert_eq!(joined, AsyncResult::Errored(error("E")));
    }

    #[test]
    fn error_wins_over_earlier_pending() {
        let joined = join_async(vec![
            ("a", AsyncResult::<u32>::Pending),
            ("b", AsyncResult::Errored(error("late"))),
        ]);
        assert_eq!(joined, AsyncResult::Errored(error("late")));
    }

    #[test]
    fn first_error_in_order_is_reported() {
        let joined = join_async(vec![
            ("a", AsyncResult::<u32>::Errored(error("first"))),
            ("b", AsyncResult::Errored(error("second"))),
        ]);
        assert_eq!(joined, AsyncResult::Errored(error("first")));
    }

    #[test]
    fn all_completed_preserves_order() {
        let joined = join_async(vec![
            ("b", AsyncResult::Completed(2)),
            ("a", AsyncResult::Completed(1)),
        ]);

        let values = joined.into_result().unwrap().unwrap();
        let entries: Vec<_> = values.into_iter().collect();
        assert_eq!(entries, vec![("b", 2), ("a", 1)]);
    }

    #[test]
    fn empty_join_is_completed() {
        let joined = join_async(Vec::<(&str, AsyncResult<u32>)>::new());
        assert_eq!(joined, AsyncResult::Completed(IndexMap::new()));

        assert_eq!(join_all(Vec::<AsyncResult<u32>>::new()), AsyncResult::Completed(vec![]));
    }

    #[test]
    fn filter_out_policies_drop_entries() {
        let inputs = || {
            vec![
                ("a", AsyncResult::Completed(1)),
                ("b", AsyncResult::Pending),
                ("c", AsyncResult::Errored(error("E"))),
            ]
        };

        let only_completed = join_async_with(inputs(), JoinOptions::completed_only());
        let values = only_completed.into_result().unwrap().unwrap();
        assert_eq!(values.keys().copied().collect::<Vec<_>>(), vec!["a"]);

        let tolerate_errors = join_async_with(
            inputs(),
            JoinOptions {
                errors: JoinPolicy::FilterOut,
                pending: JoinPolicy::Bubble,
            },
        );
        assert_eq!(tolerate_errors, AsyncResult::Pending);
    }

    #[test]
    fn join_all_over_sequence() {
        let joined = join_all(vec![AsyncResult::Completed("x"), AsyncResult::Completed("y")]);
        assert_eq!(joined, AsyncResult::Completed(vec!["x", "y"]));
    }

    #[test]
    fn options_deserialize_from_snake_case() {
        let options: JoinOptions = serde_json::from_str(r#"{"errors":"filter_out"}"#).unwrap();
        assert_eq!(options.errors, JoinPolicy::FilterOut);
        assert_eq!(options.pending, JoinPolicy::Bubble);
    }
}
