//! Reactive Async Cells
//!
//! This module implements the reactive core: cells holding asynchronous
//! results, lazily activated polling cells, per-key memoization and derived
//! cells.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`ReactiveCell`] holds an [`AsyncResult`] (pending, completed or errored)
//! and notifies its listeners whenever the result is replaced. A cell may carry
//! an activation hook which runs when it gains its first observer; the teardown
//! returned by the hook runs when the last observer leaves.
//!
//! ## Polling cells
//!
//! A [`LazyPollingCell`] turns an async fetch into a cell that fetches on
//! activation, polls on an interval and refreshes on external events, but
//! only while someone observes it.
//!
//! ## Memo maps
//!
//! A [`MemoMap`] builds one value (usually one polling cell) per key on
//! demand, so all observers of a key share the same cell and poll loop.
//!
//! ## Computed cells
//!
//! An [`AsyncComputed`] derives its result from other cells read through an
//! explicit [`ComputeContext`], and re-evaluates whenever any of them changes.
//!
//! # Implementation Notes
//!
//! There is no global registry: each cell counts its own observers, and
//! derived cells subscribe explicitly to what they read. The only per-thread
//! state is the dispatch [`batch`] queue, which defers derived refreshes until
//! a change has reached every direct listener.

mod async_result;
mod batch;
mod cell;
mod computed;
mod context;
mod memo_map;
mod polling;
mod subscriber;

pub use async_result::AsyncResult;
pub use batch::batch;
pub use cell::{Activation, Listener, ReactiveCell, Teardown};
pub use computed::AsyncComputed;
pub use context::ComputeContext;
pub use memo_map::MemoMap;
pub use polling::{
    lazy_load_and_poll_or_event, FetchFuture, LazyPollingCell, Refresh, DEFAULT_POLL_INTERVAL,
};
pub use subscriber::{CellId, ListenerId, Subscription};
