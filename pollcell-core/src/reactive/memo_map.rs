//! Memo Map
//!
//! A [`MemoMap`] hands out one value per key, building it on first lookup
//! with a factory. It is normally used to keep one polling cell per key, so
//! every observer of that key shares one cell and one poll loop.
//!
//! Building an entry is cheap and side-effect free for cells: a polling cell
//! only starts fetching once it gains its first observer, so `get` alone never
//! triggers a fetch.
//!
//! Entries live as long as the map. Removal is explicit only
//! ([`MemoMap::evict`], [`MemoMap::retain`]).

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

type Factory<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

/// Per-key registry of lazily built values.
///
/// Cloning the map clones the handle; clones share entries and factory.
pub struct MemoMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<K, V>>,
}

struct MemoInner<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, V>,
    factory: Factory<K, V>,
}

impl<K, V> MemoMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty map that builds entries with `factory`.
    ///
    /// The factory runs while the entry's shard is locked, so it must not
    /// look up keys in this same map.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(MemoInner {
                entries: DashMap::new(),
                factory: Box::new(factory),
            }),
        }
    }

    /// The value for `key`, built on first lookup.
    ///
    /// Repeated lookups of the same key return the same value; the factory
    /// runs at most once per key, even under concurrent lookups.
    pub fn get(&self, key: &K) -> V {
        if let Some(existing) = self.inner.entries.get(key) {
            return existing.value().clone();
        }

        self.inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::trace!("building memo entry");
                (self.inner.factory)(key)
            })
            .value()
            .clone()
    }

    /// The value for `key` if it was already built.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Keys built so far, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove the entry for `key`.
    ///
    /// Observers still holding the old value keep it; the next `get` builds
    /// a new one.
    pub fn evict(&self, key: &K) -> Option<V> {
        let removed = self.inner.entries.remove(key).map(|(_, value)| value);
        if removed.is_some() {
            tracing::debug!(remaining = self.inner.entries.len(), "evicted memo entry");
        }
        removed
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.inner.entries.retain(|key, value| keep(key, value));
    }
}

impl<K, V> Clone for MemoMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Debug for MemoMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoMap")
            .field("keys", &self.keys())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
