//! Push Notifications Service Store
//!
//! The store wires the reactive primitives to a push notifications service
//! client: the list of FCM projects, one service account key per project, and
//! a joined view of the keys of every known project.
//!
//! Every cell in the store is lazy. Nothing is fetched until something
//! observes it, and every cell is refreshed whenever the client reports a
//! signal.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::combinators::{join_async, map_values, slice};
use crate::error::FetchError;
use crate::reactive::{
    AsyncComputed, AsyncResult, LazyPollingCell, MemoMap, ReactiveCell, Refresh, Subscription,
};

/// Google service account credentials, as found in the JSON key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_uri: Option<String>,
    pub token_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider_x509_cert_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_x509_cert_url: Option<String>,
}

/// A signal emitted by the service. The store only cares that one arrived.
pub type ServiceSignal = serde_json::Value;

/// Callback registered through [`PushNotificationsServiceClient::on_signal`].
pub type SignalListener = Box<dyn Fn(&ServiceSignal) + Send + Sync>;

/// The calls the store makes against the push notifications service.
pub trait PushNotificationsServiceClient: Send + Sync + 'static {
    /// Every FCM project that has a service account key published.
    fn get_all_fcm_projects(&self) -> BoxFuture<'static, Result<Vec<String>, FetchError>>;

    /// The current key for `fcm_project`, if one was published.
    fn get_current_service_account_key(
        &self,
        fcm_project: &str,
    ) -> BoxFuture<'static, Result<Option<ServiceAccountKey>, FetchError>>;

    /// Call `listener` for every signal until the subscription is dropped.
    fn on_signal(&self, listener: SignalListener) -> Subscription;
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_refresh_on_signal() -> bool {
    true
}

/// Store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Delay between the end of one fetch and the start of the next.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Refetch as soon as the client reports a signal.
    #[serde(default = "default_refresh_on_signal")]
    pub refresh_on_signal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            refresh_on_signal: default_refresh_on_signal(),
        }
    }
}

impl StoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Reactive view over a [`PushNotificationsServiceClient`].
pub struct PushNotificationsServiceStore<C: PushNotificationsServiceClient> {
    client: Arc<C>,
    config: StoreConfig,

    /// All FCM projects.
    pub fcm_projects: ReactiveCell<Vec<String>>,

    /// The current service account key of each FCM project.
    pub service_account_keys: MemoMap<String, ReactiveCell<Option<ServiceAccountKey>>>,

    /// The current key of every project in [`Self::fcm_projects`].
    ///
    /// Pending until the project list and every key are known, errored as
    /// soon as any of them fails.
    pub fcm_projects_service_account_keys:
        AsyncComputed<IndexMap<String, Option<ServiceAccountKey>>>,
}

impl<C: PushNotificationsServiceClient> PushNotificationsServiceStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self::with_config(client, StoreConfig::default())
    }

    pub fn with_config(client: Arc<C>, config: StoreConfig) -> Self {
        let runtime = Handle::try_current().ok();

        let fcm_projects = {
            let fetch_client = Arc::clone(&client);
            polling_cell(
                move || fetch_client.get_all_fcm_projects(),
                &client,
                &config,
                runtime.as_ref(),
            )
        };

        let service_account_keys = {
            let client = Arc::clone(&client);
            let config = config.clone();
            MemoMap::new(move |fcm_project: &String| {
                let fetch_client = Arc::clone(&client);
                let fcm_project = fcm_project.clone();
                polling_cell(
                    move || fetch_client.get_current_service_account_key(&fcm_project),
                    &client,
                    &config,
                    runtime.as_ref(),
                )
            })
        };

        let fcm_projects_service_account_keys = {
            let fcm_projects = fcm_projects.clone();
            let service_account_keys = service_account_keys.clone();
            AsyncComputed::new(move |cx| {
                let projects = match cx.get(&fcm_projects) {
                    AsyncResult::Completed(projects) => projects,
                    AsyncResult::Pending => return AsyncResult::Pending,
                    AsyncResult::Errored(error) => return AsyncResult::Errored(error),
                };

                let cells = slice(&service_account_keys, &projects);
                join_async(map_values(&cells, |cell, _| cx.get(cell)))
            })
        };

        tracing::debug!(
            poll_interval_ms = config.poll_interval_ms,
            refresh_on_signal = config.refresh_on_signal,
            "push notifications service store created"
        );

        Self {
            client,
            config,
            fcm_projects,
            service_account_keys,
            fcm_projects_service_account_keys,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl<C: PushNotificationsServiceClient> Debug for PushNotificationsServiceStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushNotificationsServiceStore")
            .field("config", &self.config)
            .field("fcm_projects", &self.fcm_projects)
            .field("service_account_keys", &self.service_account_keys)
            .finish_non_exhaustive()
    }
}

/// A polling cell over `fetch` that also refreshes on client signals.
fn polling_cell<T, F, C>(
    fetch: F,
    client: &Arc<C>,
    config: &StoreConfig,
    runtime: Option<&Handle>,
) -> ReactiveCell<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static,
    C: PushNotificationsServiceClient,
{
    let mut builder = LazyPollingCell::new(fetch).interval(config.poll_interval());

    if config.refresh_on_signal {
        let client = Arc::clone(client);
        builder = builder.on_event(move |refresh: Refresh| {
            client.on_signal(Box::new(move |_| refresh.trigger()))
        });
    }
    if let Some(handle) = runtime {
        builder = builder.runtime(handle.clone());
    }

    builder.build()
}
