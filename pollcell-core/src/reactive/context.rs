//! Compute Context
//!
//! The compute context records which cells a derived computation reads.
//! An [`AsyncComputed`](super::AsyncComputed) hands a fresh context to its
//! compute function on every evaluation; every read made through
//! [`ComputeContext::get`] registers that cell as a dependency of this
//! evaluation.
//!
//! # Implementation
//!
//! Tracking is explicit rather than ambient: there is no thread-local "current
//! observer". Reads that bypass the context (plain `cell.get()`) are simply not
//! tracked, which is occasionally what you want.
//!
//! Dependencies are kept in first-read order and deduplicated by cell ID.

use indexmap::IndexMap;

use super::async_result::AsyncResult;
use super::batch::Job;
use super::cell::ReactiveCell;
use super::subscriber::{CellId, Subscription};

/// Something a derived cell can watch for changes.
pub(crate) trait Dependency: Send + Sync {
    /// Call `on_change` after every change until the subscription ends.
    fn watch(&self, on_change: Job) -> Subscription;
}

impl<T> Dependency for ReactiveCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn watch(&self, on_change: Job) -> Subscription {
        self.subscribe(move |_| on_change())
    }
}

/// Records the cells read during one evaluation.
pub struct ComputeContext {
    dependencies: IndexMap<CellId, Box<dyn Dependency>>,
}

impl ComputeContext {
    pub(crate) fn new() -> Self {
        Self {
            dependencies: IndexMap::new(),
        }
    }

    /// Read `cell` and register it as a dependency.
    pub fn get<T>(&mut self, cell: &ReactiveCell<T>) -> AsyncResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.track(cell);
        cell.get()
    }

    /// Register `cell` as a dependency without reading it.
    pub fn track<T>(&mut self, cell: &ReactiveCell<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.dependencies
            .entry(cell.id())
            .or_insert_with(|| Box::new(cell.clone()));
    }

    /// Number of distinct cells read so far.
    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether `cell` was read in this evaluation.
    pub fn depends_on<T>(&self, cell: &ReactiveCell<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        self.dependencies.contains_key(&cell.id())
    }

    pub(crate) fn into_dependencies(self) -> IndexMap<CellId, Box<dyn Dependency>> {
        self.dependencies
    }
}
