//! Set-valued multimap shared by terms, annotation tables and field accumulation.

use serde::Serialize;
use std::borrow::Borrow;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// A mapping from key to a set of values.
///
/// Inserting the same value twice under one key is a no-op. Iteration order
/// is the natural order of keys and values, which keeps exported documents
/// deterministic without giving insertion order any meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MultiMap<K: Ord, V: Ord> {
    inner: BTreeMap<K, BTreeSet<V>>,
}

impl<K: Ord, V: Ord> Default for MultiMap<K, V> {
    fn default() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V: Ord> MultiMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under `key`. Returns `true` if the value was not present.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.inner.entry(key).or_default().insert(value)
    }

    /// Add every value under `key`. An empty iterator leaves the map untouched.
    pub fn extend<I: IntoIterator<Item = V>>(&mut self, key: K, values: I) {
        let mut values = values.into_iter().peekable();
        if values.peek().is_none() {
            return;
        }
        self.inner.entry(key).or_default().extend(values);
    }

    /// Replace all values under `key`. Setting an empty set removes the key.
    pub fn replace(&mut self, key: K, values: BTreeSet<V>) {
        if values.is_empty() {
            self.inner.remove(&key);
        } else {
            self.inner.insert(key, values);
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&BTreeSet<V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.get(key)
    }

    /// First value (in value order) stored under `key`.
    pub fn first<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.get(key).and_then(|values| values.iter().next())
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.contains_key(key)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<BTreeSet<V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &BTreeSet<V>)> {
        self.inner.iter()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Number of (key, value) pairs.
    pub fn value_count(&self) -> usize {
        self.inner.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Get the value set for `key`, creating it if missing.
    pub fn entry_set(&mut self, key: K) -> &mut BTreeSet<V> {
        match self.inner.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(BTreeSet::new()),
        }
    }
}

impl<K: Ord, V: Ord> FromIterator<(K, V)> for MultiMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<K: Ord, V: Ord> IntoIterator for MultiMap<K, V> {
    type Item = (K, BTreeSet<V>);
    type IntoIter = std::collections::btree_map::IntoIter<K, BTreeSet<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}
