use super::Conflict;
use indexmap::IndexMap;
use std::hash::Hash;

/// Maps each key to exactly one value.
///
/// There is deliberately no `clear`: entries point back at live items, and an
/// index may only shrink by removing those items one at a time.
#[derive(Debug, Clone)]
pub struct UniqueIndex<K, V> {
    entries: IndexMap<K, V>,
}

impl<K, V> Default for UniqueIndex<K, V> {
    fn default() -> Self {
        UniqueIndex {
            entries: IndexMap::new(),
        }
    }
}

impl<K, V> UniqueIndex<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `value`. Fails without touching the index if the key is
    /// already held by a different value; re-binding the same value is a no-op.
    pub fn set(&mut self, key: K, value: V) -> Result<(), Conflict<V>> {
        match self.entries.get(&key) {
            Some(existing) if *existing != value => Err(Conflict {
                existing: existing.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(key, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove `key`. Returns false if it was not present.
    pub fn delete(&mut self, key: &K) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Remove `key` only while it is bound to `value`.
    pub fn delete_entry(&mut self, key: &K, value: &V) -> bool {
        if self.entries.get(key) == Some(value) {
            self.entries.shift_remove(key);
            true
        } else {
            false
        }
    }

    /// Number of distinct keys.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Number of stored values; equal to [`size`](Self::size) for this kind.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete_scenario() {
        let mut index = UniqueIndex::new();
        index.set(1, "a").unwrap();
        assert!(index.has(&1));
        assert_eq!(index.size(), 1);

        index.set(2, "a").unwrap();
        assert_eq!(index.size(), 2);

        assert!(index.delete(&2));
        assert_eq!(index.size(), 1);
        assert!(!index.delete(&2));
    }

    #[test]
    fn test_conflict_leaves_index_unchanged() {
        let mut index = UniqueIndex::new();
        index.set("k", 1).unwrap();

        let err = index.set("k", 2).unwrap_err();
        assert_eq!(err.existing, 1);
        assert_eq!(index.get(&"k"), Some(&1));
        assert_eq!(index.size(), 1);
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_rebinding_same_value_is_noop() {
        let mut index = UniqueIndex::new();
        index.set("k", 1).unwrap();
        index.set("k", 1).unwrap();
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_delete_entry_checks_owner() {
        let mut index = UniqueIndex::new();
        index.set("k", 1).unwrap();
        assert!(!index.delete_entry(&"k", &2));
        assert!(index.delete_entry(&"k", &1));
        assert!(index.is_empty());
    }

    #[test]
    fn test_iteration_in_insertion_order() {
        let mut index = UniqueIndex::new();
        index.set("b", 2).unwrap();
        index.set("a", 1).unwrap();
        index.set("c", 3).unwrap();
        index.delete(&"a");
        index.set("a", 4).unwrap();

        assert_eq!(index.keys().copied().collect::<Vec<_>>(), vec!["b", "c", "a"]);
        assert_eq!(index.values().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(index.iter().count(), 3);
    }
}
