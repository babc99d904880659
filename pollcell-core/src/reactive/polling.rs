//! Lazy Polling Cells
//!
//! A polling cell wraps an asynchronous fetch so that reading it stays fresh
//! while someone is watching, and costs nothing while nobody is.
//!
//! # Behaviour
//!
//! - On activation (first observer) the cell spawns a poll loop on the tokio
//!   runtime and registers with its event source. The loop fetches right away.
//! - After every fetch, successful or not, the result is published and the loop
//!   sleeps for the poll interval, measured from when the fetch settled. A slow
//!   fetch therefore delays the next poll by its own duration and two fetches
//!   of the same cell never overlap.
//! - An event from the event source wakes the loop early. Events that arrive
//!   while a fetch is in flight are coalesced into one refresh that starts as
//!   soon as that fetch settles.
//! - On deactivation (last observer gone) the loop is aborted, which cancels
//!   the pending timer or in-flight fetch, and the event subscription is
//!   dropped. Anything the aborted loop might still try to publish is
//!   discarded because its [`Activation`] is no longer live.
//!
//! Fetch errors are published as [`AsyncResult::Errored`] and never stop the
//! loop: the next poll retries. A fetch that panics counts as a failed fetch.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::Instrument;

use super::async_result::AsyncResult;
use super::cell::{Activation, ReactiveCell};
use super::subscriber::Subscription;
use crate::error::{panic_message, CellError, FetchError};

/// Poll interval used when none is given.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Boxed future returned by a fetch function.
pub type FetchFuture<T> = BoxFuture<'static, Result<T, FetchError>>;

type FetchFn<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

type EventSource = Arc<dyn Fn(Refresh) -> Subscription + Send + Sync>;

/// Handle an event source uses to ask for an immediate refresh.
#[derive(Clone, Debug, Default)]
pub struct Refresh {
    notify: Arc<Notify>,
}

impl Refresh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a refresh. Several requests before the loop gets to them count
    /// as one.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// Builder for a lazily activated, polling [`ReactiveCell`].
///
/// # Example
///
/// ```rust,ignore
/// let projects = LazyPollingCell::new(move || client.get_all_fcm_projects())
///     .interval(Duration::from_secs(10))
///     .on_event(move |refresh| client.on_signal(Box::new(move |_| refresh.trigger())))
///     .build();
/// ```
pub struct LazyPollingCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fetch: FetchFn<T>,
    interval: Option<Duration>,
    events: Option<EventSource>,
    runtime: Option<Handle>,
}

impl<T> LazyPollingCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start building a polling cell around `fetch`.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        Self {
            fetch: Arc::new(move || fetch().boxed()),
            interval: Some(DEFAULT_POLL_INTERVAL),
            events: None,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Poll every `interval` after the previous fetch settles.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Only refresh on activation and on events.
    pub fn without_polling(mut self) -> Self {
        self.interval = None;
        self
    }

    /// Refresh whenever `events` signals a change.
    ///
    /// `events` is called once per activation with a [`Refresh`] handle and
    /// returns the subscription that is dropped on deactivation.
    pub fn on_event<E>(mut self, events: E) -> Self
    where
        E: Fn(Refresh) -> Subscription + Send + Sync + 'static,
    {
        self.events = Some(Arc::new(events));
        self
    }

    /// Runtime to spawn the poll loop on when activation happens outside of
    /// one. Defaults to the runtime current at construction, if any.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the cell. Nothing is fetched until it is observed.
    pub fn build(self) -> ReactiveCell<T> {
        let Self {
            fetch,
            interval,
            events,
            runtime,
        } = self;

        ReactiveCell::lazy(move |activation: Activation<T>| {
            let teardown = start(
                Arc::clone(&fetch),
                interval,
                events.as_ref(),
                runtime.as_ref(),
                activation,
            );
            move || teardown.run()
        })
    }
}

/// Register the event source and spawn the poll loop for one activation.
fn start<T>(
    fetch: FetchFn<T>,
    interval: Option<Duration>,
    events: Option<&EventSource>,
    runtime: Option<&Handle>,
    activation: Activation<T>,
) -> PollTeardown
where
    T: Clone + Send + Sync + 'static,
{
    let handle = Handle::try_current().ok().or_else(|| runtime.cloned());
    let Some(handle) = handle else {
        tracing::warn!(cell = %activation.cell_id(), "activated without a tokio runtime");
        activation.set(AsyncResult::Errored(CellError::NoRuntime));
        return PollTeardown::default();
    };

    let refresh = Refresh::new();
    let events = events.map(|subscribe| subscribe(refresh.clone()));

    let span = tracing::debug_span!(
        "poll_loop",
        cell = %activation.cell_id(),
        epoch = activation.epoch()
    );
    let task = handle.spawn(poll_loop(fetch, interval, refresh, activation).instrument(span));

    PollTeardown {
        task: Some(task),
        events,
    }
}

/// What a deactivating polling cell has to cancel.
#[derive(Default)]
struct PollTeardown {
    task: Option<tokio::task::JoinHandle<()>>,
    events: Option<Subscription>,
}

impl PollTeardown {
    fn run(self) {
        if let Some(task) = self.task {
            task.abort();
        }
        drop(self.events);
    }
}

impl<T> From<LazyPollingCell<T>> for ReactiveCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(builder: LazyPollingCell<T>) -> Self {
        builder.build()
    }
}

/// Build a polling cell: fetch on activation, then every `interval` after
/// each fetch settles, and whenever `events` signals a change.
pub fn lazy_load_and_poll_or_event<T, F, Fut, E>(
    fetch: F,
    interval: Duration,
    events: E,
) -> ReactiveCell<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    E: Fn(Refresh) -> Subscription + Send + Sync + 'static,
{
    LazyPollingCell::new(fetch)
        .interval(interval)
        .on_event(events)
        .build()
}

async fn poll_loop<T>(
    fetch: FetchFn<T>,
    interval: Option<Duration>,
    refresh: Refresh,
    activation: Activation<T>,
) where
    T: Clone + Send + Sync + 'static,
{
    loop {
        // The fetch function itself runs inside the guarded future, so a panic
        // while building the fetch is caught as well.
        let attempt = AssertUnwindSafe(async { fetch().await }).catch_unwind().await;
        let result = match attempt {
            Ok(result) => result,
            Err(payload) => Err(FetchError::new(format!(
                "fetch panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        match &result {
            Ok(_) => tracing::debug!("fetch completed"),
            Err(error) => tracing::warn!(%error, "fetch failed"),
        }

        if !activation.set(result.into()) {
            tracing::trace!("activation ended, stopping poll loop");
            return;
        }

        match interval {
            Some(interval) => {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = refresh.requested() => tracing::trace!("refresh requested"),
                }
            }
            None => refresh.requested().await,
        }
    }
}
