//! Composite indexes: tries keyed by an ordered tuple of components.
//!
//! A node of arity N maps each *defined* first component to a child of arity
//! N-1 (at the last level, directly to a leaf). Values whose key contains an
//! undefined component from some depth onward are parked in the auxiliary
//! bucket of the node where the first undefined component was met. Such values
//! are visible to iteration and counting but never to exact lookups, and they
//! are exempt from uniqueness: an undefined component never equals another.

use super::{Bucket, Conflict};
use indexmap::{IndexMap, IndexSet};
use std::borrow::Cow;
use std::fmt;
use std::hash::Hash;

/// Storage at the full depth of a composite trie.
pub trait Leaf<V>: fmt::Debug {
    fn single(value: V) -> Self;

    fn insert(&mut self, value: V) -> Result<(), Conflict<V>>;

    /// Remove `value` (or, when `None`, whatever a key-only removal means for
    /// this leaf). Returns whether anything was removed.
    fn remove(&mut self, value: Option<&V>) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn values(&self) -> Box<dyn Iterator<Item = &V> + '_>;
}

/// Leaf of a unique composite index: at most one value per full key.
#[derive(Debug, Clone)]
pub struct SingleLeaf<V>(Option<V>);

impl<V: Clone + PartialEq + fmt::Debug> Leaf<V> for SingleLeaf<V> {
    fn single(value: V) -> Self {
        SingleLeaf(Some(value))
    }

    fn insert(&mut self, value: V) -> Result<(), Conflict<V>> {
        match &self.0 {
            Some(existing) if *existing != value => Err(Conflict {
                existing: existing.clone(),
            }),
            _ => {
                self.0 = Some(value);
                Ok(())
            }
        }
    }

    fn remove(&mut self, value: Option<&V>) -> bool {
        match value {
            Some(value) if self.0.as_ref() != Some(value) => false,
            _ => self.0.take().is_some(),
        }
    }

    fn len(&self) -> usize {
        usize::from(self.0.is_some())
    }

    fn values(&self) -> Box<dyn Iterator<Item = &V> + '_> {
        Box::new(self.0.iter())
    }
}

/// Leaf of a multi-value composite index: an insertion-ordered set.
#[derive(Debug, Clone)]
pub struct SetLeaf<V>(IndexSet<V>);

impl<V: Eq + Hash + fmt::Debug> Leaf<V> for SetLeaf<V> {
    fn single(value: V) -> Self {
        let mut set = IndexSet::new();
        set.insert(value);
        SetLeaf(set)
    }

    fn insert(&mut self, value: V) -> Result<(), Conflict<V>> {
        self.0.insert(value);
        Ok(())
    }

    fn remove(&mut self, value: Option<&V>) -> bool {
        value.map_or(false, |value| self.0.shift_remove(value))
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn values(&self) -> Box<dyn Iterator<Item = &V> + '_> {
        Box::new(self.0.iter())
    }
}

/// One trie level. Only one of `branches` / `leaves` is ever populated:
/// `leaves` at the last level, `branches` everywhere above it.
#[derive(Debug, Clone)]
struct Node<K, V, L> {
    branches: IndexMap<K, Node<K, V, L>>,
    leaves: IndexMap<K, L>,
    aux: Vec<V>,
}

impl<K, V, L> Node<K, V, L>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
    L: Leaf<V>,
{
    fn new() -> Self {
        Node {
            branches: IndexMap::new(),
            leaves: IndexMap::new(),
            aux: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.leaves.is_empty() && self.aux.is_empty()
    }

    fn size(&self) -> usize {
        self.branches.len() + self.leaves.len()
    }

    fn count(&self) -> usize {
        self.branches.values().map(|branch| branch.count()).sum::<usize>()
            + self.leaves.values().map(|leaf| leaf.len()).sum::<usize>()
            + self.aux.len()
    }

    fn keys(&self) -> impl Iterator<Item = &K> {
        self.branches.keys().chain(self.leaves.keys())
    }

    fn collect_values<'a>(&'a self, out: &mut Vec<&'a V>) {
        for branch in self.branches.values() {
            branch.collect_values(out);
        }
        for leaf in self.leaves.values() {
            out.extend(leaf.values());
        }
        out.extend(self.aux.iter());
    }

    fn collect_entries<'a>(&'a self, prefix: &mut Vec<K>, out: &mut Vec<(Vec<K>, &'a V)>) {
        for (key, branch) in &self.branches {
            prefix.push(key.clone());
            branch.collect_entries(prefix, out);
            prefix.pop();
        }
        for (key, leaf) in &self.leaves {
            for value in leaf.values() {
                let mut full = prefix.clone();
                full.push(key.clone());
                out.push((full, value));
            }
        }
    }

    fn insert(&mut self, keys: &[Option<K>], value: V) -> Result<(), Conflict<V>> {
        let Some((Some(key), rest)) = keys.split_first() else {
            self.aux.push(value);
            return Ok(());
        };

        if rest.is_empty() {
            if let Some(leaf) = self.leaves.get_mut(key) {
                return leaf.insert(value);
            }
            self.leaves.insert(key.clone(), L::single(value));
            return Ok(());
        }

        self.branches
            .entry(key.clone())
            .or_insert_with(Node::new)
            .insert(rest, value)
    }

    fn remove(&mut self, keys: &[Option<K>], value: Option<&V>) -> bool {
        let Some((Some(key), rest)) = keys.split_first() else {
            let Some(value) = value else {
                return false;
            };
            return match self.aux.iter().position(|parked| parked == value) {
                Some(pos) => {
                    self.aux.remove(pos);
                    true
                }
                None => false,
            };
        };

        if rest.is_empty() {
            let Some(leaf) = self.leaves.get_mut(key) else {
                return false;
            };
            let removed = leaf.remove(value);
            if leaf.is_empty() {
                self.leaves.shift_remove(key);
            }
            return removed;
        }

        let Some(child) = self.branches.get_mut(key) else {
            return false;
        };
        let removed = child.remove(rest, value);
        if child.is_empty() {
            self.branches.shift_remove(key);
        }
        removed
    }
}

enum Resolved<'a, K, V, L> {
    Node(&'a Node<K, V, L>),
    Leaf(&'a L),
}

/// A trie of fixed arity. Use through [`CompositeUniqueIndex`] or
/// [`CompositeMultiValueIndex`].
#[derive(Debug, Clone)]
pub struct CompositeIndex<K, V, L> {
    arity: usize,
    root: Node<K, V, L>,
}

/// One value per fully-defined key tuple.
pub type CompositeUniqueIndex<K, V> = CompositeIndex<K, V, SingleLeaf<V>>;

/// A set of values per key tuple.
pub type CompositeMultiValueIndex<K, V> = CompositeIndex<K, V, SetLeaf<V>>;

impl<K, V, L> CompositeIndex<K, V, L>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
    L: Leaf<V>,
{
    /// Create an index over `arity` components (at least 1).
    pub fn new(arity: usize) -> Self {
        debug_assert!(arity > 0, "composite index needs at least one component");
        CompositeIndex {
            arity: arity.max(1),
            root: Node::new(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Pad or truncate a key to the index arity; missing components are undefined.
    fn normalise<'k>(&self, keys: &'k [Option<K>]) -> Cow<'k, [Option<K>]> {
        if keys.len() == self.arity {
            return Cow::Borrowed(keys);
        }
        let mut owned: Vec<Option<K>> = keys.iter().take(self.arity).cloned().collect();
        owned.resize(self.arity, None);
        Cow::Owned(owned)
    }

    /// Insert `value` under `keys` (`None` marks an undefined component).
    /// A fully-defined key already holding a different value in a unique
    /// index is a conflict and leaves the index unchanged.
    pub fn set(&mut self, keys: &[Option<K>], value: V) -> Result<(), Conflict<V>> {
        let keys = self.normalise(keys);
        self.root.insert(&keys, value)
    }

    /// Remove `value` from under `keys`, pruning branches left empty.
    ///
    /// Where the key has an undefined component the value itself is the
    /// locator, so `value` must be given. At a concrete unique leaf the key is
    /// enough; a given value must then match the stored one.
    pub fn delete(&mut self, keys: &[Option<K>], value: Option<&V>) -> bool {
        let keys = self.normalise(keys);
        self.root.remove(&keys, value)
    }

    /// True if every given component resolves a concrete branch (or, for a
    /// full key, a leaf). A branch holding only parked values still counts,
    /// so `true` for a short key does not prove a concrete child below it.
    pub fn has(&self, keys: &[K]) -> bool {
        self.view().has(keys)
    }

    /// The sub-index below `keys` (fewer components than the arity). Always
    /// an index view, empty if nothing is stored there.
    pub fn prefix(&self, keys: &[K]) -> Prefix<'_, K, V, L> {
        self.view().prefix(keys)
    }

    /// Number of distinct defined first components.
    pub fn size(&self) -> usize {
        self.root.size()
    }

    /// Number of stored values, including those parked under undefined components.
    pub fn count(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Defined first components, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.root.keys()
    }

    /// Every stored value, depth first in insertion order; parked values of a
    /// node follow its children.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.view().values()
    }

    /// Fully-defined keys with their values. Parked values have no full key
    /// and are not listed.
    pub fn entries(&self) -> Vec<(Vec<K>, &V)> {
        let mut out = Vec::new();
        self.root.collect_entries(&mut Vec::new(), &mut out);
        out
    }

    fn view(&self) -> Prefix<'_, K, V, L> {
        Prefix {
            node: Some(&self.root),
            arity: self.arity,
        }
    }

    fn leaf(&self, keys: &[K]) -> Option<&L> {
        if keys.len() != self.arity {
            return None;
        }
        match self.view().resolve(keys)? {
            Resolved::Leaf(leaf) => Some(leaf),
            Resolved::Node(_) => None,
        }
    }
}

impl<K, V> CompositeIndex<K, V, SingleLeaf<V>>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq + fmt::Debug,
{
    /// The value stored under a full key.
    pub fn get(&self, keys: &[K]) -> Option<&V> {
        self.leaf(keys).and_then(|leaf| leaf.0.as_ref())
    }
}

impl<K, V> CompositeIndex<K, V, SetLeaf<V>>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + fmt::Debug,
{
    /// The bucket stored under a full key, or the shared empty bucket.
    pub fn get(&self, keys: &[K]) -> Bucket<'_, V> {
        Bucket::new(self.leaf(keys).map(|leaf| &leaf.0))
    }
}

/// Read-only view of a composite index below some prefix.
pub struct Prefix<'a, K, V, L> {
    node: Option<&'a Node<K, V, L>>,
    arity: usize,
}

impl<'a, K, V, L> Prefix<'a, K, V, L>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
    L: Leaf<V>,
{
    /// Components still unresolved below this view.
    pub fn arity(&self) -> usize {
        self.arity
    }

    fn resolve(&self, keys: &[K]) -> Option<Resolved<'a, K, V, L>> {
        let mut node = self.node?;
        if keys.len() > self.arity {
            return None;
        }
        for (depth, key) in keys.iter().enumerate() {
            if depth + 1 == self.arity {
                return node.leaves.get(key).map(Resolved::Leaf);
            }
            node = node.branches.get(key)?;
        }
        Some(Resolved::Node(node))
    }

    /// Like [`CompositeIndex::has`]: a node with only parked values below it
    /// is present.
    pub fn has(&self, keys: &[K]) -> bool {
        if keys.is_empty() {
            return false;
        }
        match self.resolve(keys) {
            Some(Resolved::Leaf(leaf)) => !leaf.is_empty(),
            Some(Resolved::Node(node)) => !node.is_empty(),
            None => false,
        }
    }

    pub fn prefix(&self, keys: &[K]) -> Prefix<'a, K, V, L> {
        let arity = self.arity.saturating_sub(keys.len());
        let node = if arity == 0 {
            None
        } else {
            match self.resolve(keys) {
                Some(Resolved::Node(node)) => Some(node),
                _ => None,
            }
        };
        Prefix { node, arity }
    }

    pub fn size(&self) -> usize {
        self.node.map_or(0, Node::size)
    }

    pub fn count(&self) -> usize {
        self.node.map_or(0, Node::count)
    }

    pub fn is_empty(&self) -> bool {
        self.node.map_or(true, Node::is_empty)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a K> {
        self.node.into_iter().flat_map(|node| node.keys())
    }

    pub fn values(&self) -> impl Iterator<Item = &'a V> {
        let mut out = Vec::new();
        if let Some(node) = self.node {
            node.collect_values(&mut out);
        }
        out.into_iter()
    }
}

impl<K, V, L> fmt::Debug for Prefix<'_, K, V, L>
where
    K: fmt::Debug,
    V: fmt::Debug,
    L: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefix")
            .field("arity", &self.arity)
            .field("node", &self.node)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(parts: &[i32]) -> Vec<Option<i32>> {
        parts.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_unique_scenario() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(3);
        index.set(&key(&[1, 2, 3]), "a").unwrap();
        assert_eq!(index.get(&[1, 2, 3]), Some(&"a"));
        assert!(index.has(&[1, 2]));
        assert!(index.prefix(&[2]).is_empty());
        assert!(!index.has(&[2]));

        index.set(&key(&[1, 2, 4]), "d").unwrap();
        index.set(&key(&[1, 4, 5]), "c").unwrap();
        let under_one: Vec<&str> = index.prefix(&[1]).values().copied().collect();
        assert_eq!(under_one, vec!["a", "d", "c"]);

        assert!(index.delete(&key(&[1, 2, 3]), None));
        assert!(!index.delete(&key(&[1, 2, 3]), None));
    }

    #[test]
    fn test_unique_conflict() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(2);
        index.set(&key(&[1, 2]), "a").unwrap();
        let err = index.set(&key(&[1, 2]), "b").unwrap_err();
        assert_eq!(err.existing, "a");
        assert_eq!(index.get(&[1, 2]), Some(&"a"));
        assert_eq!(index.count(), 1);
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_conflict_keeps_existing_branches() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(3);
        index.set(&key(&[1, 2, 3]), "a").unwrap();
        assert!(index.set(&key(&[1, 2, 3]), "b").is_err());
        assert_eq!(index.prefix(&[1]).size(), 1);
        assert_eq!(index.prefix(&[1, 2]).size(), 1);
    }

    #[test]
    fn test_undefined_components_are_exempt() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(3);
        index.set(&[Some(1), None, Some(3)], "x").unwrap();
        index.set(&[Some(1), None, Some(3)], "y").unwrap();
        index.set(&[None, None, None], "z").unwrap();

        assert_eq!(index.count(), 3);
        assert_eq!(index.size(), 1);
        assert_eq!(index.prefix(&[1]).count(), 2);
        assert_eq!(index.prefix(&[1]).size(), 0);
        assert!(index.has(&[1]));
        assert!(index.prefix(&[1]).keys().next().is_none());
        assert!(!index.has(&[1, 3]));
        assert_eq!(index.get(&[1, 3, 3]), None);
    }

    #[test]
    fn test_delete_parked_value_requires_value() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(2);
        index.set(&[Some(1), None], "x").unwrap();
        assert!(!index.delete(&[Some(1), None], None));
        assert!(!index.delete(&[Some(1), None], Some(&"y")));
        assert!(index.delete(&[Some(1), None], Some(&"x")));
        assert!(index.is_empty());
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_parked_order_and_reinsertion() {
        let mut index: CompositeMultiValueIndex<i32, &str> = CompositeMultiValueIndex::new(2);
        index.set(&[None, Some(1)], "a").unwrap();
        index.set(&[None, Some(2)], "b").unwrap();
        index.set(&[None, None], "c").unwrap();
        index.delete(&[None, Some(1)], Some(&"a"));
        index.set(&[None, Some(1)], "a").unwrap();

        let values: Vec<&str> = index.values().copied().collect();
        assert_eq!(values, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_prefix_is_always_an_index() {
        let index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(3);
        let empty = index.prefix(&[7]);
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.count(), 0);
        assert_eq!(empty.arity(), 2);
        assert!(empty.prefix(&[8]).is_empty());
        assert!(!index.has(&[7]));
    }

    #[test]
    fn test_pruning_on_delete() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(3);
        index.set(&key(&[1, 2, 3]), "a").unwrap();
        index.set(&key(&[1, 5, 6]), "b").unwrap();
        index.delete(&key(&[1, 2, 3]), Some(&"a"));

        assert!(!index.has(&[1, 2]));
        assert!(index.has(&[1, 5]));
        index.delete(&key(&[1, 5, 6]), Some(&"b"));
        assert!(!index.has(&[1]));
        assert!(index.is_empty());
    }

    #[test]
    fn test_single_leaf_delete_checks_given_value() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(2);
        index.set(&key(&[1, 2]), "a").unwrap();
        assert!(!index.delete(&key(&[1, 2]), Some(&"b")));
        assert!(index.delete(&key(&[1, 2]), Some(&"a")));
    }

    #[test]
    fn test_multi_buckets() {
        let mut index: CompositeMultiValueIndex<&str, u32> = CompositeMultiValueIndex::new(2);
        index.set(&[Some("x"), Some("y")], 1).unwrap();
        index.set(&[Some("x"), Some("y")], 2).unwrap();
        index.set(&[Some("x"), Some("z")], 3).unwrap();

        assert_eq!(index.get(&["x", "y"]).to_vec(), vec![1, 2]);
        assert!(index.get(&["x", "q"]).is_empty());
        assert_eq!(index.prefix(&["x"]).size(), 2);
        assert_eq!(index.count(), 3);

        assert!(index.delete(&[Some("x"), Some("y")], Some(&1)));
        assert!(!index.delete(&[Some("x"), Some("y")], None));
        assert_eq!(index.get(&["x", "y"]).to_vec(), vec![2]);
    }

    #[test]
    fn test_short_keys_are_padded() {
        let mut index: CompositeMultiValueIndex<i32, u32> = CompositeMultiValueIndex::new(3);
        index.set(&[Some(1)], 9).unwrap();
        assert_eq!(index.count(), 1);
        assert!(!index.has(&[1, 2]));
        assert!(index.delete(&[Some(1), None, None], Some(&9)));
    }

    #[test]
    fn test_entries_and_keys() {
        let mut index: CompositeUniqueIndex<i32, &str> = CompositeUniqueIndex::new(2);
        index.set(&key(&[1, 2]), "a").unwrap();
        index.set(&key(&[3, 4]), "b").unwrap();
        index.set(&[Some(1), None], "p").unwrap();

        assert_eq!(index.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(index.entries(), vec![(vec![1, 2], &"a"), (vec![3, 4], &"b")]);
    }
}
