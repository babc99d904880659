//! Slicing and mapping keyed collections.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use indexmap::IndexMap;

use crate::reactive::MemoMap;

/// Read access by key.
///
/// Implemented for the standard maps and for [`MemoMap`], whose lookups always
/// succeed because missing entries are built on demand.
pub trait KeyedLookup<K, V> {
    fn lookup(&self, key: &K) -> Option<V>;
}

impl<K, V, S> KeyedLookup<K, V> for IndexMap<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }
}

impl<K, V, S> KeyedLookup<K, V> for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }
}

impl<K, V> KeyedLookup<K, V> for BTreeMap<K, V>
where
    K: Ord,
    V: Clone,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.get(key).cloned()
    }
}

impl<K, V> KeyedLookup<K, V> for MemoMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lookup(&self, key: &K) -> Option<V> {
        Some(self.get(key))
    }
}

/// The entries of `map` for `keys`, in `keys` order.
///
/// Keys missing from `map` are skipped. Duplicate keys appear once.
pub fn slice<K, V, M>(map: &M, keys: &[K]) -> IndexMap<K, V>
where
    K: Hash + Eq + Clone,
    M: KeyedLookup<K, V> + ?Sized,
{
    let mut sliced = IndexMap::with_capacity(keys.len());
    for key in keys {
        if sliced.contains_key(key) {
            continue;
        }
        if let Some(value) = map.lookup(key) {
            sliced.insert(key.clone(), value);
        }
    }
    sliced
}

/// Apply `f(value, key)` to every entry, keeping keys and order.
pub fn map_values<K, V, U, F>(map: &IndexMap<K, V>, mut f: F) -> IndexMap<K, U>
where
    K: Hash + Eq + Clone,
    F: FnMut(&V, &K) -> U,
{
    map.iter()
        .map(|(key, value)| (key.clone(), f(value, key)))
        .collect()
}
