//! Reactive Cell
//!
//! A [`ReactiveCell`] holds one [`AsyncResult`] and notifies its listeners
//! whenever the result is replaced.
//!
//! # Lifecycle
//!
//! A cell may be built with an activation hook ([`ReactiveCell::lazy`]). The
//! hook runs when the cell gains its first listener and returns a teardown
//! that runs when the last listener leaves. Hook and teardown strictly
//! alternate. When the teardown runs the cell forgets its value and goes back
//! to [`AsyncResult::Pending`], so a fresh observation never starts from a
//! stale result.
//!
//! Cells without a hook ([`ReactiveCell::new`], [`ReactiveCell::pending`]) are
//! plain sources: their value is whatever was last `set`, observed or not.
//!
//! # Thread Safety
//!
//! Each cell has a re-entrant gate that serializes `set`, subscription and
//! lifecycle changes. The snapshot itself sits behind a plain mutex that is
//! only held long enough to swap or clone the value, never while listeners or
//! hooks run. Listeners can therefore read any cell (including this one) and
//! even `set` it again from the same thread.
//!
//! A `set` made by a listener supersedes the dispatch that called it: every
//! listener sees the newer value, and the outer dispatch stops instead of
//! handing out the older one. Listeners removed during a dispatch are not
//! called again.
//!
//! The gate stays held while listeners run. Cells may be updated from any
//! thread, but a listener must not `set` a cell that another thread might be
//! updating from a listener of this one: the two gates would be taken in
//! opposite orders. Derived cells never do this, since their refreshes run
//! after the gate is released.
//!
//! Every gated operation runs inside a dispatch [`batch`], so derived cells
//! refresh only after the gate is released and all direct listeners have seen
//! the new value.

use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use smallvec::SmallVec;

use super::async_result::AsyncResult;
use super::batch::batch;
use super::subscriber::{CellId, ListenerId, Subscription};

/// A change listener.
pub type Listener<T> = Arc<dyn Fn(&AsyncResult<T>) + Send + Sync>;

/// Cleanup returned by an activation hook.
pub type Teardown = Box<dyn FnOnce() + Send>;

type ActivateHook<T> = Box<dyn Fn(Activation<T>) -> Teardown + Send + Sync>;

/// A shared, observable asynchronous value.
///
/// Cloning a cell clones the handle; all clones share the same state.
pub struct ReactiveCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    id: CellId,

    /// Serializes updates, subscriptions and lifecycle transitions.
    gate: ReentrantMutex<()>,

    state: Mutex<CellState<T>>,

    on_activate: Option<ActivateHook<T>>,
}

struct CellState<T> {
    value: AsyncResult<T>,

    /// Listeners in subscription order.
    listeners: SmallVec<[(ListenerId, Listener<T>); 4]>,

    /// Bumped on every activation.
    epoch: u64,

    /// Bumped on every value change.
    version: u64,

    active: bool,

    teardown: Option<Teardown>,
}

impl<T> ReactiveCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a source cell holding `initial`.
    pub fn new(initial: AsyncResult<T>) -> Self {
        Self::build(initial, None)
    }

    /// Create a source cell that starts pending.
    pub fn pending() -> Self {
        Self::new(AsyncResult::Pending)
    }

    /// Create a source cell that starts completed with `value`.
    pub fn completed(value: T) -> Self {
        Self::new(AsyncResult::Completed(value))
    }

    /// Create a cell driven by an activation hook.
    ///
    /// `on_activate` runs on every 0 → 1 listener transition and receives an
    /// [`Activation`] through which it publishes results. The teardown it
    /// returns runs on the matching 1 → 0 transition.
    pub fn lazy<F, D>(on_activate: F) -> Self
    where
        F: Fn(Activation<T>) -> D + Send + Sync + 'static,
        D: FnOnce() + Send + 'static,
    {
        let hook: ActivateHook<T> =
            Box::new(move |activation: Activation<T>| -> Teardown { Box::new(on_activate(activation)) });
        Self::build(AsyncResult::Pending, Some(hook))
    }

    fn build(initial: AsyncResult<T>, on_activate: Option<ActivateHook<T>>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: CellId::new(),
                gate: ReentrantMutex::new(()),
                state: Mutex::new(CellState {
                    value: initial,
                    listeners: SmallVec::new(),
                    epoch: 0,
                    version: 0,
                    active: false,
                    teardown: None,
                }),
                on_activate,
            }),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Snapshot of the current result. Has no side effects.
    pub fn get(&self) -> AsyncResult<T> {
        self.inner.state.lock().value.clone()
    }

    /// Replace the result and notify every listener, in subscription order.
    ///
    /// All notifications have completed when this returns.
    pub fn set(&self, result: AsyncResult<T>) {
        batch(|| {
            let _gate = self.inner.gate.lock();
            self.inner.replace_and_notify(result);
        });
    }

    /// Register a change listener.
    ///
    /// The first listener activates the cell. The listener stays registered
    /// until the returned [`Subscription`] is released or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AsyncResult<T>) + Send + Sync + 'static,
    {
        let listener_id = ListenerId::new();
        let listener: Listener<T> = Arc::new(listener);

        batch(|| {
            let _gate = self.inner.gate.lock();
            let first = {
                let mut state = self.inner.state.lock();
                state.listeners.push((listener_id, listener));
                state.listeners.len() == 1
            };
            if first {
                CellInner::activate(&self.inner);
            }
        });

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_listener(listener_id);
            }
        })
    }

    /// Number of registered listeners.
    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Whether the activation hook is currently live.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> CellInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Swap the value and dispatch. The caller holds the gate.
    fn replace_and_notify(&self, result: AsyncResult<T>) {
        let (version, listeners): (u64, SmallVec<[(ListenerId, Listener<T>); 4]>) = {
            let mut state = self.state.lock();
            state.value = result.clone();
            state.version += 1;
            (state.version, state.listeners.clone())
        };

        tracing::trace!(cell = %self.id, version, listeners = listeners.len(), "dispatching change");
        for (listener_id, listener) in listeners {
            {
                let state = self.state.lock();
                if state.version != version {
                    // A listener set a newer value, already dispatched to everyone.
                    tracing::trace!(cell = %self.id, version, "dispatch superseded");
                    return;
                }
                if !state.listeners.iter().any(|(id, _)| *id == listener_id) {
                    continue;
                }
            }
            listener(&result);
        }
    }

    /// Run the activation hook. The caller holds the gate.
    fn activate(this: &Arc<Self>) {
        let Some(hook) = &this.on_activate else {
            return;
        };

        let epoch = {
            let mut state = this.state.lock();
            debug_assert!(!state.active, "cell activated twice");
            state.epoch += 1;
            state.active = true;
            state.epoch
        };

        tracing::trace!(cell = %this.id, epoch, "activating");
        let teardown = hook(Activation {
            cell: Arc::downgrade(this),
            cell_id: this.id,
            epoch,
        });

        let mut state = this.state.lock();
        if state.active && state.epoch == epoch {
            state.teardown = Some(teardown);
        } else {
            // Deactivated from inside the hook.
            drop(state);
            teardown();
        }
    }

    fn remove_listener(&self, listener_id: ListenerId) {
        batch(|| {
            let _gate = self.gate.lock();
            let teardown = {
                let mut state = self.state.lock();
                let before = state.listeners.len();
                state.listeners.retain(|(id, _)| *id != listener_id);

                let removed_last = before > 0 && state.listeners.is_empty();
                if !removed_last || self.on_activate.is_none() {
                    return;
                }

                debug_assert!(state.active, "deactivating an inactive cell");
                state.active = false;
                state.value = AsyncResult::Pending;
                state.version += 1;
                state.teardown.take()
            };

            tracing::trace!(cell = %self.id, "deactivating");
            if let Some(teardown) = teardown {
                teardown();
            }
        });
    }
}

impl<T> Clone for ReactiveCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for ReactiveCell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("id", &self.inner.id)
            .field("value", &self.get())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

/// Publishing handle given to an activation hook.
///
/// It does not keep the cell alive, and it only writes while the activation it
/// was created for is still live: once the cell deactivates (even if it is
/// later re-activated) `set` becomes a no-op returning `false`.
pub struct Activation<T> {
    cell: Weak<CellInner<T>>,
    cell_id: CellId,
    epoch: u64,
}

impl<T> Activation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Publish `result` if this activation is still live.
    pub fn set(&self, result: AsyncResult<T>) -> bool {
        let Some(inner) = self.cell.upgrade() else {
            return false;
        };

        batch(|| {
            let _gate = inner.gate.lock();
            {
                let state = inner.state.lock();
                if !state.active || state.epoch != self.epoch {
                    return false;
                }
            }
            inner.replace_and_notify(result);
            true
        })
    }

    /// Whether this activation is still live.
    pub fn is_live(&self) -> bool {
        self.cell.upgrade().is_some_and(|inner| {
            let state = inner.state.lock();
            state.active && state.epoch == self.epoch
        })
    }

    /// Current value of the cell, or pending if the cell is gone.
    pub fn current(&self) -> AsyncResult<T> {
        self.cell
            .upgrade()
            .map(|inner| inner.state.lock().value.clone())
            .unwrap_or_default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// ID of the cell this activation publishes to.
    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    /// Run `f` while holding the cell's gate, if this activation is live.
    ///
    /// Deactivation takes the same gate, so the activation stays live for the
    /// whole call. `f` may call [`set`](Self::set) on this activation.
    pub(crate) fn run_exclusive<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.cell.upgrade()?;

        batch(|| {
            let _gate = inner.gate.lock();
            {
                let state = inner.state.lock();
                if !state.active || state.epoch != self.epoch {
                    return None;
                }
            }
            Some(f())
        })
    }
}

impl<T> Clone for Activation<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
            cell_id: self.cell_id,
            epoch: self.epoch,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cell() -> (ReactiveCell<u32>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let activations = Arc::new(AtomicUsize::new(0));
        let deactivations = Arc::new(AtomicUsize::new(0));

        let cell = {
            let activations = activations.clone();
            let deactivations = deactivations.clone();
            ReactiveCell::lazy(move |activation: Activation<u32>| {
                activations.fetch_add(1, Ordering::SeqCst);
                activation.set(AsyncResult::Completed(7));
                let deactivations = deactivations.clone();
                move || {
                    deactivations.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        (cell, activations, deactivations)
    }

    #[test]
    fn cell_get_and_set() {
        let cell = ReactiveCell::pending();
        assert_eq!(cell.get(), AsyncResult::Pending);

        cell.set(AsyncResult::Completed(42));
        assert_eq!(cell.get(), AsyncResult::Completed(42));
    }

    #[test]
    fn cell_notifies_in_subscription_order() {
        let cell = ReactiveCell::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _a = {
            let seen = seen.clone();
            cell.subscribe(move |r: &AsyncResult<u32>| seen.lock().push(("a", r.clone())))
        };
        let _b = {
            let seen = seen.clone();
            cell.subscribe(move |r: &AsyncResult<u32>| seen.lock().push(("b", r.clone())))
        };

        cell.set(AsyncResult::Completed(1));

        assert_eq!(
            *seen.lock(),
            vec![("a", AsyncResult::Completed(1)), ("b", AsyncResult::Completed(1))]
        );
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let cell = ReactiveCell::pending();
        let calls = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let calls = calls.clone();
            cell.subscribe(move |_: &AsyncResult<u32>| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        cell.set(AsyncResult::Completed(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        cell.set(AsyncResult::Completed(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cell.observer_count(), 0);
    }

    #[test]
    fn activation_runs_once_for_many_observers() {
        let (cell, activations, deactivations) = counting_cell();

        let subscriptions: Vec<_> = (0..5).map(|_| cell.subscribe(|_| {})).collect();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(cell.observer_count(), 5);
        assert!(cell.is_active());

        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
        assert!(!cell.is_active());
    }

    #[test]
    fn activate_and_deactivate_alternate() {
        let (cell, activations, deactivations) = counting_cell();

        for round in 1..=3 {
            let a = cell.subscribe(|_| {});
            let b = cell.subscribe(|_| {});
            drop(a);
            drop(b);
            assert_eq!(activations.load(Ordering::SeqCst), round);
            assert_eq!(deactivations.load(Ordering::SeqCst), round);
        }
    }

    #[test]
    fn lazy_cell_resets_to_pending_on_last_unsubscribe() {
        let (cell, _, _) = counting_cell();
        assert_eq!(cell.get(), AsyncResult::Pending);

        let subscription = cell.subscribe(|_| {});
        assert_eq!(cell.get(), AsyncResult::Completed(7));

        drop(subscription);
        assert_eq!(cell.get(), AsyncResult::Pending);
    }

    #[test]
    fn source_cell_keeps_value_without_observers() {
        let cell = ReactiveCell::completed(3);
        let subscription = cell.subscribe(|_| {});
        drop(subscription);
        assert_eq!(cell.get(), AsyncResult::Completed(3));
    }

    #[test]
    fn stale_activation_cannot_write() {
        let stash: Arc<Mutex<Option<Activation<u32>>>> = Arc::new(Mutex::new(None));
        let cell = {
            let stash = stash.clone();
            ReactiveCell::lazy(move |activation: Activation<u32>| {
                *stash.lock() = Some(activation);
                || {}
            })
        };

        let subscription = cell.subscribe(|_| {});
        let first = stash.lock().take().unwrap();
        assert!(first.is_live());
        assert!(first.set(AsyncResult::Completed(1)));
        drop(subscription);

        let _subscription = cell.subscribe(|_| {});
        assert!(!first.is_live());
        assert!(!first.set(AsyncResult::Completed(2)));
        assert_eq!(cell.get(), AsyncResult::Pending);

        let second = stash.lock().take().unwrap();
        assert_eq!(second.epoch(), first.epoch() + 1);
        assert!(second.set(AsyncResult::Completed(3)));
        assert_eq!(cell.get(), AsyncResult::Completed(3));
    }

    #[test]
    fn listener_can_read_and_set_reentrantly() {
        let cell = ReactiveCell::pending();
        let reader = cell.clone();
        let _subscription = cell.subscribe(move |r: &AsyncResult<u32>| {
            assert_eq!(reader.get(), *r);
            if let AsyncResult::Completed(v) = r {
                if *v < 3 {
                    reader.set(AsyncResult::Completed(v + 1));
                }
            }
        });

        cell.set(AsyncResult::Completed(0));
        assert_eq!(cell.get(), AsyncResult::Completed(3));
    }

    #[test]
    fn nested_set_supersedes_outer_dispatch() {
        let cell = ReactiveCell::pending();
        let seen_by_second = Arc::new(Mutex::new(Vec::new()));

        let _first = {
            let setter = cell.clone();
            cell.subscribe(move |r: &AsyncResult<u32>| {
                if *r == AsyncResult::Completed(1) {
                    setter.set(AsyncResult::Completed(2));
                }
            })
        };
        let _second = {
            let seen = seen_by_second.clone();
            cell.subscribe(move |r: &AsyncResult<u32>| seen.lock().push(r.clone()))
        };

        cell.set(AsyncResult::Completed(1));

        assert_eq!(cell.get(), AsyncResult::Completed(2));
        assert_eq!(*seen_by_second.lock(), vec![AsyncResult::Completed(2)]);
    }

    #[test]
    fn listener_removed_mid_dispatch_is_not_called() {
        let cell = ReactiveCell::pending();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let _first = {
            let slot = second_slot.clone();
            cell.subscribe(move |_: &AsyncResult<u32>| {
                if let Some(subscription) = slot.lock().take() {
                    subscription.unsubscribe();
                }
            })
        };
        *second_slot.lock() = Some({
            let calls = second_calls.clone();
            cell.subscribe(move |_: &AsyncResult<u32>| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        cell.set(AsyncResult::Completed(1));

        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cell.observer_count(), 1);
    }

    #[test]
    fn concurrent_sets_leave_listeners_consistent() {
        let cell = ReactiveCell::pending();
        let last_seen = Arc::new(Mutex::new(AsyncResult::Pending));

        let _subscription = {
            let last_seen = last_seen.clone();
            cell.subscribe(move |r: &AsyncResult<u32>| *last_seen.lock() = r.clone())
        };

        std::thread::scope(|scope| {
            for thread in 0..4u32 {
                let cell = cell.clone();
                scope.spawn(move || {
                    for i in 0..100 {
                        cell.set(AsyncResult::Completed(thread * 1000 + i));
                    }
                });
            }
        });

        assert_eq!(*last_seen.lock(), cell.get());
    }

    #[test]
    fn clones_share_state() {
        let a = ReactiveCell::pending();
        let b = a.clone();
        a.set(AsyncResult::Completed("x"));
        assert_eq!(b.get(), AsyncResult::Completed("x"));
        assert!(a.ptr_eq(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.ptr_eq(&ReactiveCell::pending()));
    }
}
