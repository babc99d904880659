//! Async Computed
//!
//! An [`AsyncComputed`] is a derived cell: its value is produced by a compute
//! function over other cells, and it re-evaluates whenever one of the cells it
//! read last time changes.
//!
//! # How It Works
//!
//! 1. Nothing runs while the computed cell has no observers. Its snapshot is
//!    pending.
//!
//! 2. On the first observer, the compute function runs with a fresh
//!    [`ComputeContext`]. Every cell read through the context becomes a
//!    dependency, and the computed cell subscribes to each of them.
//!
//! 3. When a dependency changes, a refresh is deferred until the change has
//!    been fully dispatched, then the compute function runs again. Cells that
//!    were not read this time are unsubscribed; newly read ones are
//!    subscribed.
//!
//! 4. When the last observer leaves, all dependency subscriptions are dropped
//!    (which may in turn deactivate upstream polling cells) and the snapshot
//!    goes back to pending.
//!
//! A panic inside the compute function is captured as
//! [`CellError::Compute`].

use std::fmt::{self, Debug};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use super::async_result::AsyncResult;
use super::batch::{defer, Job};
use super::cell::{Activation, ReactiveCell};
use super::context::{ComputeContext, Dependency};
use super::subscriber::{CellId, Subscription};
use crate::error::{panic_message, CellError};

type ComputeFn<T> = Box<dyn Fn(&mut ComputeContext) -> AsyncResult<T> + Send + Sync>;

/// A derived asynchronous cell.
///
/// Dereferences to the underlying [`ReactiveCell`], so it can be read,
/// subscribed to, or used as a dependency of another computed cell.
pub struct AsyncComputed<T>
where
    T: Clone + Send + Sync + 'static,
{
    cell: ReactiveCell<T>,
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    /// Key under which refreshes are deduplicated.
    refresh_key: CellId,

    compute: ComputeFn<T>,

    /// The live activation, while observed.
    live: Mutex<Option<Activation<T>>>,

    /// Subscriptions to the dependencies of the last evaluation.
    dependencies: Mutex<IndexMap<CellId, Subscription>>,

    evaluations: AtomicU64,
}

impl<T> AsyncComputed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed cell. The compute function does not run until the
    /// cell is observed.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&mut ComputeContext) -> AsyncResult<T> + Send + Sync + 'static,
    {
        let inner = Arc::new(ComputedInner {
            refresh_key: CellId::new(),
            compute: Box::new(compute),
            live: Mutex::new(None),
            dependencies: Mutex::new(IndexMap::new()),
            evaluations: AtomicU64::new(0),
        });

        let hook_inner = Arc::clone(&inner);
        let cell = ReactiveCell::lazy(move |activation: Activation<T>| {
            *hook_inner.live.lock() = Some(activation);
            ComputedInner::refresh(&hook_inner);

            let inner = Arc::clone(&hook_inner);
            move || inner.release()
        });

        Self { cell, inner }
    }

    /// The underlying cell.
    pub fn cell(&self) -> &ReactiveCell<T> {
        &self.cell
    }

    /// How many times the compute function has run.
    pub fn evaluation_count(&self) -> u64 {
        self.inner.evaluations.load(Ordering::Relaxed)
    }

    /// Number of cells the last evaluation depends on.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Re-evaluate and publish, if still observed.
    fn refresh(this: &Arc<Self>) {
        let Some(activation) = this.live.lock().clone() else {
            return;
        };

        // Runs under the cell's gate so deactivation cannot interleave.
        activation.run_exclusive(|| {
            let mut cx = ComputeContext::new();
            let result = match panic::catch_unwind(AssertUnwindSafe(|| (this.compute)(&mut cx))) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(cell = %activation.cell_id(), %message, "compute panicked");
                    AsyncResult::Errored(CellError::Compute(message))
                }
            };
            this.evaluations.fetch_add(1, Ordering::Relaxed);

            Self::resubscribe(this, cx.into_dependencies());
            activation.set(result);
        });
    }

    /// Make the subscription set match `dependencies`.
    fn resubscribe(this: &Arc<Self>, dependencies: IndexMap<CellId, Box<dyn Dependency>>) {
        let wanted: IndexSet<CellId> = dependencies.keys().copied().collect();

        // Subscribe to new dependencies before dropping stale ones, so a cell
        // read by both evaluations never deactivates in between.
        let added: Vec<(CellId, Box<dyn Dependency>)> = {
            let current = this.dependencies.lock();
            dependencies
                .into_iter()
                .filter(|(id, _)| !current.contains_key(id))
                .collect()
        };

        for (id, dependency) in added {
            let weak = Arc::downgrade(this);
            let job: Job = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    ComputedInner::refresh(&inner);
                }
            });
            let refresh_key = this.refresh_key;
            let subscription =
                dependency.watch(Arc::new(move || defer(refresh_key, Arc::clone(&job))));
            this.dependencies.lock().insert(id, subscription);
        }

        let stale: Vec<Subscription> = {
            let mut current = this.dependencies.lock();
            let stale_ids: Vec<CellId> = current
                .keys()
                .filter(|id| !wanted.contains(*id))
                .copied()
                .collect();
            stale_ids
                .iter()
                .filter_map(|id| current.shift_remove(id))
                .collect()
        };
        if !stale.is_empty() {
            tracing::trace!(dropped = stale.len(), "dropping stale dependencies");
        }
        drop(stale);
    }

    /// Drop every dependency subscription. Runs as the cell's teardown.
    fn release(&self) {
        self.live.lock().take();
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        drop(dependencies);
    }
}

impl<T> Deref for AsyncComputed<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Target = ReactiveCell<T>;

    fn deref(&self) -> &Self::Target {
        &self.cell
    }
}

impl<T> Clone for AsyncComputed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for AsyncComputed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncComputed")
            .field("cell", &self.cell)
            .field("evaluations", &self.evaluation_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
