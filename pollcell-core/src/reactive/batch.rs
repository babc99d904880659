//! Dispatch Batching
//!
//! Derived cells must never re-evaluate in the middle of an update: when a
//! dependency changes, every direct listener of that dependency is notified
//! first, and only then do derived cells recompute.
//!
//! # Implementation
//!
//! Each thread keeps a small dispatch state. Every `set` runs inside
//! [`batch`], which bumps a depth counter. Derived cells do not recompute from
//! their dependency listeners; they [`defer`] a refresh job instead. When the
//! outermost batch on the thread finishes, queued jobs are drained in FIFO
//! order. A job queued twice before it runs only runs once.
//!
//! Jobs may themselves call `set`, which opens a nested batch. The drain loop
//! is not re-entered; jobs enqueued while draining are picked up by the loop
//! that is already running.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::subscriber::CellId;

/// A deferred refresh.
pub(crate) type Job = Arc<dyn Fn() + Send + Sync>;

thread_local! {
    static DISPATCH: RefCell<DispatchState> = RefCell::new(DispatchState::default());
}

#[derive(Default)]
struct DispatchState {
    depth: usize,
    draining: bool,
    queue: VecDeque<(CellId, Job)>,
    queued: HashSet<CellId>,
}

/// Decrements the batch depth when dropped, so a panicking listener does not
/// leave the thread stuck inside a batch.
struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        DISPATCH.with(|state| state.borrow_mut().depth += 1);
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DISPATCH.with(|state| {
            let mut state = state.borrow_mut();
            debug_assert!(state.depth > 0, "batch depth underflow");
            state.depth = state.depth.saturating_sub(1);
        });
    }
}

/// Clears the draining flag even if a job panics.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DISPATCH.with(|state| state.borrow_mut().draining = false);
    }
}

/// Run `f` as one dispatch batch.
///
/// Derived cells affected by any `set` inside `f` re-evaluate once, after `f`
/// returns (unless this call is itself nested in an outer batch, in which case
/// they wait for the outermost one).
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let depth = DepthGuard::enter();
    let result = f();
    drop(depth);
    flush();
    result
}

/// Queue a refresh job for the derived cell `id`.
pub(crate) fn defer(id: CellId, job: Job) {
    DISPATCH.with(|state| {
        let mut state = state.borrow_mut();
        if state.queued.insert(id) {
            state.queue.push_back((id, job));
        }
    });
    flush();
}

/// Whether the current thread is inside a batch or draining one.
#[cfg(test)]
fn in_dispatch() -> bool {
    DISPATCH.with(|state| {
        let state = state.borrow();
        state.depth > 0 || state.draining
    })
}

fn flush() {
    let should_drain = DISPATCH.with(|state| {
        let mut state = state.borrow_mut();
        if state.depth == 0 && !state.draining && !state.queue.is_empty() {
            state.draining = true;
            true
        } else {
            false
        }
    });
    if !should_drain {
        return;
    }

    let _draining = DrainGuard;
    loop {
        let next = DISPATCH.with(|state| {
            let mut state = state.borrow_mut();
            let next = state.queue.pop_front();
            if let Some((id, _)) = &next {
                state.queued.remove(id);
            }
            next
        });
        let Some((id, job)) = next else {
            break;
        };
        tracing::trace!(cell = %id, "running deferred refresh");
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn defer_outside_batch_runs_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        defer(
            CellId::new(),
            Arc::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!in_dispatch());
    }

    #[test]
    fn jobs_wait_for_outermost_batch_and_dedupe() {
        let runs = Arc::new(AtomicUsize::new(0));
        let id = CellId::new();
        let job: Job = {
            let runs = runs.clone();
            Arc::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        batch(|| {
            defer(id, job.clone());
            batch(|| defer(id, job.clone()));
            assert_eq!(runs.load(Ordering::SeqCst), 0);
            assert!(in_dispatch());
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jobs_queued_while_draining_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let second_id = CellId::new();

        let second: Job = {
            let order = order.clone();
            Arc::new(move || order.lock().unwrap().push("second"))
        };
        let first: Job = {
            let order = order.clone();
            Arc::new(move || {
                order.lock().unwrap().push("first");
                defer(second_id, second.clone());
                order.lock().unwrap().push("first-done");
            })
        };

        batch(|| defer(CellId::new(), first));

        assert_eq!(*order.lock().unwrap(), vec!["first", "first-done", "second"]);
    }
}
