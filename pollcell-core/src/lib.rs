//! Pollcell Core
//!
//! This crate provides a reactive cache for asynchronous data. It implements:
//!
//! - Reactive cells holding pending, completed or errored results
//! - Lazily activated polling cells that refresh on a timer and on events
//! - Per-key memoization of cells
//! - Combinators to slice, map and join keyed collections of results
//! - Derived cells that re-evaluate when the cells they read change
//! - A store exposing a push notifications service through these cells
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Cells, polling, memo maps and derived cells
//! - `combinators`: Pure helpers over keyed results (`slice`, `map_values`,
//!   `join_async`)
//! - `store`: The push notifications service store
//! - `error`: Errors held by cells
//!
//! # Example
//!
//! ```rust,ignore
//! use pollcell_core::combinators::{join_async, map_values, slice};
//! use pollcell_core::reactive::{AsyncComputed, LazyPollingCell, MemoMap};
//!
//! // One polling cell per key, fetched only while observed
//! let keys = MemoMap::new(move |project: &String| {
//!     let client = client.clone();
//!     let project = project.clone();
//!     LazyPollingCell::new(move || client.get_current_service_account_key(&project)).build()
//! });
//!
//! // Join the cells of every project into one derived cell
//! let joined = AsyncComputed::new(move |cx| {
//!     let cells = slice(&keys, &projects);
//!     join_async(map_values(&cells, |cell, _| cx.get(cell)))
//! });
//!
//! // Observing the derived cell activates every keyed cell it reads
//! let _subscription = joined.subscribe(|result| println!("{result:?}"));
//! ```

pub mod combinators;
pub mod error;
pub mod reactive;
pub mod store;

pub use error::{CellError, FetchError};
pub use reactive::{AsyncComputed, AsyncResult, LazyPollingCell, MemoMap, ReactiveCell};
pub use store::{PushNotificationsServiceClient, PushNotificationsServiceStore, StoreConfig};
