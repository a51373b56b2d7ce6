use super::Bucket;
use indexmap::{IndexMap, IndexSet};
use std::hash::Hash;

/// Maps each key to a set of values. Buckets exist only while non-empty.
#[derive(Debug, Clone)]
pub struct MultiValueIndex<K, V> {
    buckets: IndexMap<K, IndexSet<V>>,
}

impl<K, V> Default for MultiValueIndex<K, V> {
    fn default() -> Self {
        MultiValueIndex {
            buckets: IndexMap::new(),
        }
    }
}

impl<K, V> MultiValueIndex<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` under `key`. Returns false if it was already there.
    pub fn add(&mut self, key: K, value: V) -> bool {
        self.buckets.entry(key).or_default().insert(value)
    }

    /// Remove `value` from `key`'s bucket, dropping the bucket once empty.
    pub fn delete(&mut self, key: &K, value: &V) -> bool {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };
        let removed = bucket.shift_remove(value);
        if bucket.is_empty() {
            self.buckets.shift_remove(key);
        }
        removed
    }

    /// The bucket for `key`, or the shared empty bucket.
    pub fn get(&self, key: &K) -> Bucket<'_, V> {
        Bucket::new(self.buckets.get(key))
    }

    pub fn has(&self, key: &K) -> bool {
        self.buckets.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of values across all buckets.
    pub fn count(&self) -> usize {
        self.buckets.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.buckets.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.buckets.values().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, Bucket<'_, V>)> {
        self.buckets
            .iter()
            .map(|(key, bucket)| (key, Bucket::new(Some(bucket))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_returns_empty_bucket() {
        let index: MultiValueIndex<&str, u32> = MultiValueIndex::new();
        let bucket = index.get(&"missing");
        assert_eq!(bucket.len(), 0);
        assert!(bucket.is_empty());
        assert!(!index.has(&"missing"));
        assert_eq!(index.get(&"other").len(), 0);
    }

    #[test]
    fn test_add_and_delete() {
        let mut index = MultiValueIndex::new();
        assert!(index.add("red", 1));
        assert!(index.add("red", 2));
        assert!(!index.add("red", 2));
        assert!(index.add("blue", 3));

        assert_eq!(index.size(), 2);
        assert_eq!(index.count(), 3);
        assert_eq!(index.get(&"red").to_vec(), vec![1, 2]);

        assert!(index.delete(&"red", &1));
        assert!(!index.delete(&"red", &1));
        assert!(!index.delete(&"green", &1));
        assert_eq!(index.count(), 2);
    }

    #[test]
    fn test_last_delete_drops_bucket() {
        let mut index = MultiValueIndex::new();
        index.add("red", 1);
        index.delete(&"red", &1);
        assert!(!index.has(&"red"));
        assert_eq!(index.size(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_iteration() {
        let mut index = MultiValueIndex::new();
        index.add("a", 1);
        index.add("b", 2);
        index.add("a", 3);

        assert_eq!(index.keys().copied().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(index.values().copied().collect::<Vec<_>>(), vec![1, 3, 2]);
        let sizes: Vec<usize> = index.iter().map(|(_, bucket)| bucket.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
    }
}
