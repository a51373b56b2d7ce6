//! The four index kinds and the per-collection [`IndexStore`] that binds them
//! to item ids.
//!
//! Each kind is its own type exposing only the operations that are safe for
//! it: a [`UniqueIndex`] cannot be cleared, a [`MultiValueIndex`] has no
//! `set`, and the empty bucket handed out for a missing key is read-only.

pub mod composite;
pub mod multi;
pub mod unique;

pub use composite::{CompositeMultiValueIndex, CompositeUniqueIndex, Prefix};
pub use multi::MultiValueIndex;
pub use unique::UniqueIndex;

use crate::id::Id;
use crate::value::IndexKey;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// A unique key is already held by `existing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict<V> {
    pub existing: V,
}

/// Read-only view of the values stored under one multi-value key.
///
/// Missing keys all share the same empty state; no allocation is made for them.
#[derive(Debug)]
pub struct Bucket<'a, V> {
    values: Option<&'a IndexSet<V>>,
}

impl<'a, V> Bucket<'a, V> {
    pub(crate) fn new(values: Option<&'a IndexSet<V>>) -> Self {
        Bucket { values }
    }

    pub fn empty() -> Self {
        Bucket { values: None }
    }

    pub fn len(&self) -> usize {
        self.values.map_or(0, IndexSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a V> {
        self.values.into_iter().flatten()
    }

    pub fn first(&self) -> Option<&'a V> {
        self.values.and_then(IndexSet::first)
    }

    pub fn contains(&self, value: &V) -> bool
    where
        V: Eq + Hash,
    {
        self.values.map_or(false, |set| set.contains(value))
    }

    pub fn to_vec(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.iter().cloned().collect()
    }
}

impl<V> Clone for Bucket<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Bucket<'_, V> {}

impl<'a, V> IntoIterator for Bucket<'a, V> {
    type Item = &'a V;
    type IntoIter = std::iter::Flatten<std::option::IntoIter<&'a IndexSet<V>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter().flatten()
    }
}

/// Which of the four index structures backs a named index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Unique,
    Multi,
    CompositeUnique,
    CompositeMulti,
}

impl IndexKind {
    pub fn is_unique(self) -> bool {
        matches!(self, IndexKind::Unique | IndexKind::CompositeUnique)
    }

    pub fn is_composite(self) -> bool {
        matches!(self, IndexKind::CompositeUnique | IndexKind::CompositeMulti)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Unique => "unique",
            IndexKind::Multi => "multi",
            IndexKind::CompositeUnique => "composite unique",
            IndexKind::CompositeMulti => "composite multi",
        };
        f.write_str(name)
    }
}

/// An installed index of a collection, mapping index keys to item ids.
///
/// Keys are passed as component slices: scalar kinds use the first
/// component, composite kinds all of them. An undefined component is `None`.
#[derive(Debug, Clone)]
pub enum IndexStore {
    Unique(UniqueIndex<IndexKey, Id>),
    Multi(MultiValueIndex<IndexKey, Id>),
    CompositeUnique(CompositeUniqueIndex<IndexKey, Id>),
    CompositeMulti(CompositeMultiValueIndex<IndexKey, Id>),
}

impl IndexStore {
    pub fn new(kind: IndexKind, arity: usize) -> Self {
        match kind {
            IndexKind::Unique => IndexStore::Unique(UniqueIndex::new()),
            IndexKind::Multi => IndexStore::Multi(MultiValueIndex::new()),
            IndexKind::CompositeUnique => IndexStore::CompositeUnique(CompositeUniqueIndex::new(arity)),
            IndexKind::CompositeMulti => IndexStore::CompositeMulti(CompositeMultiValueIndex::new(arity)),
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            IndexStore::Unique(_) => IndexKind::Unique,
            IndexStore::Multi(_) => IndexKind::Multi,
            IndexStore::CompositeUnique(_) => IndexKind::CompositeUnique,
            IndexStore::CompositeMulti(_) => IndexKind::CompositeMulti,
        }
    }

    /// Number of key components.
    pub fn arity(&self) -> usize {
        match self {
            IndexStore::Unique(_) | IndexStore::Multi(_) => 1,
            IndexStore::CompositeUnique(index) => index.arity(),
            IndexStore::CompositeMulti(index) => index.arity(),
        }
    }

    /// Enter `id` under `key`. Scalar keys that are undefined, and composite
    /// keys with no defined component, hold no entry.
    pub(crate) fn insert(&mut self, key: &[Option<IndexKey>], id: &Id) -> Result<(), Conflict<Id>> {
        match self {
            IndexStore::Unique(index) => match scalar(key) {
                Some(k) => index.set(k.clone(), id.clone()),
                None => Ok(()),
            },
            IndexStore::Multi(index) => {
                if let Some(k) = scalar(key) {
                    index.add(k.clone(), id.clone());
                }
                Ok(())
            }
            IndexStore::CompositeUnique(index) if any_defined(key) => index.set(key, id.clone()),
            IndexStore::CompositeMulti(index) if any_defined(key) => index.set(key, id.clone()),
            IndexStore::CompositeUnique(_) | IndexStore::CompositeMulti(_) => Ok(()),
        }
    }

    /// Remove the entry `insert(key, id)` made. Returns whether one was found.
    pub(crate) fn remove(&mut self, key: &[Option<IndexKey>], id: &Id) -> bool {
        match self {
            IndexStore::Unique(index) => scalar(key).map_or(false, |k| index.delete_entry(k, id)),
            IndexStore::Multi(index) => scalar(key).map_or(false, |k| index.delete(k, id)),
            IndexStore::CompositeUnique(index) if any_defined(key) => index.delete(key, Some(id)),
            IndexStore::CompositeMulti(index) if any_defined(key) => index.delete(key, Some(id)),
            IndexStore::CompositeUnique(_) | IndexStore::CompositeMulti(_) => false,
        }
    }

    /// The current holder of a fully-defined key in a unique index.
    pub fn owner(&self, key: &[Option<IndexKey>]) -> Option<&Id> {
        match self {
            IndexStore::Unique(index) => scalar(key).and_then(|k| index.get(k)),
            IndexStore::CompositeUnique(index) => {
                let full: Option<Vec<IndexKey>> = key.iter().cloned().collect();
                full.and_then(|full| index.get(&full))
            }
            IndexStore::Multi(_) | IndexStore::CompositeMulti(_) => None,
        }
    }

    /// Number of distinct (top-level) keys.
    pub fn size(&self) -> usize {
        match self {
            IndexStore::Unique(index) => index.size(),
            IndexStore::Multi(index) => index.size(),
            IndexStore::CompositeUnique(index) => index.size(),
            IndexStore::CompositeMulti(index) => index.size(),
        }
    }

    /// Number of stored ids.
    pub fn count(&self) -> usize {
        match self {
            IndexStore::Unique(index) => index.count(),
            IndexStore::Multi(index) => index.count(),
            IndexStore::CompositeUnique(index) => index.count(),
            IndexStore::CompositeMulti(index) => index.count(),
        }
    }

    /// Whether the given key (or, for composites, key prefix) resolves.
    pub fn has(&self, keys: &[IndexKey]) -> bool {
        match self {
            IndexStore::Unique(index) => matches!(keys, [k] if index.has(k)),
            IndexStore::Multi(index) => matches!(keys, [k] if index.has(k)),
            IndexStore::CompositeUnique(index) => index.has(keys),
            IndexStore::CompositeMulti(index) => index.has(keys),
        }
    }

    /// Ids stored under a key. For composites a shorter key acts as a prefix
    /// and an empty key lists every id.
    pub fn lookup(&self, keys: &[IndexKey]) -> Vec<&Id> {
        match self {
            IndexStore::Unique(index) => match keys {
                [k] => index.get(k).into_iter().collect(),
                _ => Vec::new(),
            },
            IndexStore::Multi(index) => match keys {
                [k] => index.get(k).into_iter().collect(),
                _ => Vec::new(),
            },
            IndexStore::CompositeUnique(index) if keys.len() == index.arity() => {
                index.get(keys).into_iter().collect()
            }
            IndexStore::CompositeMulti(index) if keys.len() == index.arity() => {
                index.get(keys).into_iter().collect()
            }
            IndexStore::CompositeUnique(index) => index.prefix(keys).values().collect(),
            IndexStore::CompositeMulti(index) => index.prefix(keys).values().collect(),
        }
    }

    /// Every stored id in index order.
    pub fn ids(&self) -> Vec<&Id> {
        match self {
            IndexStore::Unique(index) => index.values().collect(),
            IndexStore::Multi(index) => index.values().collect(),
            IndexStore::CompositeUnique(index) => index.values().collect(),
            IndexStore::CompositeMulti(index) => index.values().collect(),
        }
    }

    pub fn as_unique(&self) -> Option<&UniqueIndex<IndexKey, Id>> {
        match self {
            IndexStore::Unique(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_multi(&self) -> Option<&MultiValueIndex<IndexKey, Id>> {
        match self {
            IndexStore::Multi(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_composite_unique(&self) -> Option<&CompositeUniqueIndex<IndexKey, Id>> {
        match self {
            IndexStore::CompositeUnique(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_composite_multi(&self) -> Option<&CompositeMultiValueIndex<IndexKey, Id>> {
        match self {
            IndexStore::CompositeMulti(index) => Some(index),
            _ => None,
        }
    }
}

fn scalar(key: &[Option<IndexKey>]) -> Option<&IndexKey> {
    key.first().and_then(Option::as_ref)
}

fn any_defined(key: &[Option<IndexKey>]) -> bool {
    key.iter().any(Option::is_some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(n: u8) -> Id {
        Id::parse(&format!("{:024x}", n)).unwrap()
    }

    #[test]
    fn test_empty_bucket_is_shared_and_read_only() {
        let bucket: Bucket<'_, u32> = Bucket::empty();
        assert_eq!(bucket.len(), 0);
        assert!(bucket.first().is_none());
        assert!(!bucket.contains(&1));
        assert_eq!(bucket.into_iter().count(), 0);
    }

    #[test]
    fn test_store_unique_owner_and_conflict() {
        let mut store = IndexStore::new(IndexKind::Unique, 1);
        let key = [Some(IndexKey::from("ada"))];
        store.insert(&key, &id(1)).unwrap();
        assert_eq!(store.owner(&key), Some(&id(1)));

        let err = store.insert(&key, &id(2)).unwrap_err();
        assert_eq!(err.existing, id(1));
        assert_eq!(store.count(), 1);

        assert!(!store.remove(&key, &id(2)));
        assert!(store.remove(&key, &id(1)));
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_store_ignores_undefined_keys() {
        let mut unique = IndexStore::new(IndexKind::Unique, 1);
        unique.insert(&[None], &id(1)).unwrap();
        assert_eq!(unique.count(), 0);

        let mut composite = IndexStore::new(IndexKind::CompositeUnique, 2);
        composite.insert(&[None, None], &id(1)).unwrap();
        assert_eq!(composite.count(), 0);
        composite.insert(&[Some(IndexKey::from(1_i64)), None], &id(1)).unwrap();
        composite.insert(&[Some(IndexKey::from(1_i64)), None], &id(2)).unwrap();
        assert_eq!(composite.count(), 2);
        assert_eq!(composite.owner(&[Some(IndexKey::from(1_i64)), None]), None);
    }

    #[test]
    fn test_store_lookup() {
        let mut multi = IndexStore::new(IndexKind::Multi, 1);
        multi.insert(&[Some(IndexKey::from(true))], &id(1)).unwrap();
        multi.insert(&[Some(IndexKey::from(true))], &id(2)).unwrap();
        assert_eq!(multi.lookup(&[IndexKey::from(true)]), vec![&id(1), &id(2)]);
        assert!(multi.lookup(&[IndexKey::from(false)]).is_empty());
        assert!(multi.has(&[IndexKey::from(true)]));
        assert!(!multi.has(&[]));

        let mut composite = IndexStore::new(IndexKind::CompositeMulti, 2);
        let a = IndexKey::from("a");
        composite.insert(&[Some(a.clone()), Some(IndexKey::from(1_i64))], &id(3)).unwrap();
        composite.insert(&[Some(a.clone()), Some(IndexKey::from(2_i64))], &id(4)).unwrap();
        assert_eq!(composite.lookup(&[a.clone()]), vec![&id(3), &id(4)]);
        assert_eq!(composite.lookup(&[a.clone(), IndexKey::from(2_i64)]), vec![&id(4)]);
        assert_eq!(composite.lookup(&[]).len(), 2);
        assert_eq!(composite.ids().len(), 2);
        assert_eq!(composite.kind(), IndexKind::CompositeMulti);
        assert!(composite.as_composite_multi().is_some());
        assert!(composite.as_unique().is_none());
    }
}
