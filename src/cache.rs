use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

/// Storage for values resolved by a `Loader`.
///
/// There is no eviction: an entry lives until it is cleared or the owning loader is dropped. The
/// loader stores `Option<V>` so that "not found" answers are cached like any other success.
pub trait Cache: Send {
    type K;
    type V;

    fn lookup(&self, key: &Self::K) -> Option<&Self::V>;

    /// Inserts `value` unless `key` is already present. Returns whether it was inserted.
    fn insert_if_absent(&mut self, key: Self::K, value: Self::V) -> bool;

    fn remove(&mut self, key: &Self::K);
    fn flush(&mut self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, S> Cache for HashMap<K, V, S>
where
    K: Eq + Hash + Send,
    V: Send,
    S: BuildHasher + Send,
{
    type K = K;
    type V = V;

    fn lookup(&self, key: &K) -> Option<&V> {
        self.get(key)
    }

    fn insert_if_absent(&mut self, key: K, value: V) -> bool {
        match self.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    fn remove(&mut self, key: &K) {
        HashMap::remove(self, key);
    }

    fn flush(&mut self) {
        self.clear();
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

impl<K, V> Cache for BTreeMap<K, V>
where
    K: Ord + Send,
    V: Send,
{
    type K = K;
    type V = V;

    fn lookup(&self, key: &K) -> Option<&V> {
        self.get(key)
    }

    fn insert_if_absent(&mut self, key: K, value: V) -> bool {
        match self.entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    fn remove(&mut self, key: &K) {
        BTreeMap::remove(self, key);
    }

    fn flush(&mut self) {
        self.clear();
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}
