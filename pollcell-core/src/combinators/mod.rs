//! Collection Combinators
//!
//! Pure helpers store authors use inside
//! [`AsyncComputed`](crate::reactive::AsyncComputed) closures to turn a set of
//! per-key cells into one asynchronous map:
//!
//! - [`slice`] picks the entries for a list of keys out of any keyed lookup
//!   (including a [`MemoMap`](crate::reactive::MemoMap), which builds the
//!   missing ones on demand).
//! - [`map_values`] transforms every value, keeping keys and order.
//! - [`join_async`] merges many [`AsyncResult`](crate::reactive::AsyncResult)s
//!   into one. Errors win over pending, pending wins over completed, and a
//!   completed join contains every value in input order.
//!
//! # Example
//!
//! ```rust,ignore
//! let joined = AsyncComputed::new(move |cx| {
//!     let projects = match cx.get(&projects) {
//!         AsyncResult::Completed(projects) => projects,
//!         other => return other.map(|_| IndexMap::new()),
//!     };
//!     let cells = slice(&keys, &projects);
//!     join_async(map_values(&cells, |cell, _| cx.get(cell)))
//! });
//! ```

mod join;
mod slice;

pub use join::{join_all, join_async, join_async_with, JoinOptions, JoinPolicy};
pub use slice::{map_values, slice, KeyedLookup};
