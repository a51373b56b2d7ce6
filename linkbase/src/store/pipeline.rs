//! The single-property write: coercion, the unique probe, the slot commit,
//! index maintenance with rollback, and relation upkeep.

use super::{Database, Item};
use crate::error::{LinkbaseError, Result};
use crate::id::Id;
use crate::index::Conflict;
use crate::schema::{Accessor, CollectionDescriptor, FieldType};
use crate::validation::{coerce_ref, coerce_refs, coerce_value};
use crate::value::{describe_key, IndexKey, Value};
use serde_json::Value as Json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Normal,
    /// Item teardown: required fields may be cleared.
    Teardown,
}

/// A foreign `has_one` write made on behalf of a reciprocal view:
/// `(item, new target)`.
type ForeignWrite = (Id, Option<Id>);

/// The stored value a foreign write replaced.
#[derive(Debug, Clone)]
pub(crate) struct Undo {
    collection: usize,
    property: usize,
    id: Id,
    previous: Option<Value>,
}

impl Database {
    /// Coerce `raw` for `property` and write it. `None` clears the property.
    pub(crate) fn write_property(
        &mut self,
        collection: usize,
        id: &Id,
        property: usize,
        raw: Option<&Json>,
        mode: WriteMode,
    ) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(collection);
        let prop = descriptor.property_at(property);
        let (owner, name) = (descriptor.name.as_str(), prop.name.as_str());

        match prop.accessor {
            Accessor::Scalar { .. } => {
                let field_type = prop.field_type.unwrap_or(FieldType::Any);
                let value = raw
                    .map(|raw| coerce_value(owner, name, field_type, prop.enum_values.as_deref(), raw))
                    .transpose()?;
                self.write_value(collection, id, property, value, mode)
            }
            Accessor::HasOne { .. } => {
                let target = raw.map(|raw| coerce_ref(owner, name, raw)).transpose()?;
                self.write_has_one(collection, id, property, target, mode)
            }
            Accessor::OneToOne { .. } => {
                let target = raw.map(|raw| coerce_ref(owner, name, raw)).transpose()?;
                self.write_one_to_one(collection, id, property, target, mode)
            }
            Accessor::HasMany { .. } | Accessor::ManyToOne { .. } => {
                let ids = raw
                    .map(|raw| coerce_refs(owner, name, raw))
                    .transpose()?
                    .unwrap_or_default();
                self.write_ids(collection, id, property, ids, mode)
            }
        }
    }

    /// Write an already coerced value into a plain field.
    pub(crate) fn write_value(
        &mut self,
        collection: usize,
        id: &Id,
        property: usize,
        value: Option<Value>,
        mode: WriteMode,
    ) -> Result<()> {
        self.check_required(collection, property, value.is_none(), mode)?;
        self.commit(collection, id, property, value)
    }

    /// Replace the members of an id-set property.
    pub(crate) fn write_ids(
        &mut self,
        collection: usize,
        id: &Id,
        property: usize,
        ids: Vec<Id>,
        mode: WriteMode,
    ) -> Result<()> {
        match self.schema.collection(collection).property_at(property).accessor {
            Accessor::HasMany { .. } => self.write_has_many(collection, id, property, ids, mode),
            Accessor::ManyToOne { .. } => self.write_many_to_one(collection, id, property, ids, mode),
            _ => Err(self.wrong_accessor(collection, property, "an id set")),
        }
    }

    pub(crate) fn write_has_one(
        &mut self,
        collection: usize,
        id: &Id,
        property: usize,
        target: Option<Id>,
        mode: WriteMode,
    ) -> Result<()> {
        let Accessor::HasOne { foreign, .. } = self.schema.collection(collection).property_at(property).accessor else {
            return Err(self.wrong_accessor(collection, property, "a reference"));
        };
        self.check_required(collection, property, target.is_none(), mode)?;
        if let Some(target) = &target {
            self.require_reference(foreign, target)?;
        }
        self.commit(collection, id, property, target.map(Value::Ref))
    }

    /// Many-to-many (or one-directional) id set. The foreign reciprocal sets
    /// are patched directly: they carry no index, so the patch cannot fail
    /// once the required check on each unlinked target has passed.
    pub(crate) fn write_has_many(
        &mut self,
        collection: usize,
        id: &Id,
        property: usize,
        ids: Vec<Id>,
        mode: WriteMode,
    ) -> Result<()> {
        let Accessor::HasMany { foreign, reciprocal, .. } =
            self.schema.collection(collection).property_at(property).accessor
        else {
            return Err(self.wrong_accessor(collection, property, "an id set"));
        };
        self.check_required(collection, property, ids.is_empty(), mode)?;

        let old = match self.stored_value(collection, id, property)? {
            Some(Value::Refs(old)) => old,
            _ => Vec::new(),
        };
        for target in ids.iter().filter(|target| !old.contains(target)) {
            self.require_reference(foreign, target)?;
        }
        if let Some(reciprocal) = reciprocal {
            // Unlinking must not empty a required set on the other side.
            for target in old.iter().filter(|target| !ids.contains(target)) {
                let Ok(remaining) = self.stored_value(foreign, target, reciprocal) else {
                    continue;
                };
                let emptied = match remaining {
                    Some(Value::Refs(others)) => others.iter().all(|other| other == id),
                    _ => true,
                };
                if emptied {
                    self.check_required(foreign, reciprocal, true, mode)?;
                }
            }
        }

        let value = (!ids.is_empty()).then(|| Value::Refs(ids.clone()));
        self.commit(collection, id, property, value)?;

        if let Some(reciprocal) = reciprocal {
            for target in old.iter().filter(|target| !ids.contains(target)) {
                self.patch_reciprocal(foreign, target, reciprocal, id, false);
            }
            for target in ids.iter().filter(|target| !old.contains(target)) {
                self.patch_reciprocal(foreign, target, reciprocal, id, true);
            }
        }
        Ok(())
    }

    /// Reciprocal of a one-to-many relation: every linked foreign item gets
    /// its `has_one` field pointed here, every unlinked one gets it cleared.
    pub(crate) fn write_many_to_one(
        &mut self,
        collection: usize,
        id: &Id,
        property: usize,
        ids: Vec<Id>,
        mode: WriteMode,
    ) -> Result<()> {
        let Accessor::ManyToOne { foreign, property: foreign_property, .. } =
            self.schema.collection(collection).property_at(property).accessor
        else {
            return Err(self.wrong_accessor(collection, property, "a one-to-many reciprocal"));
        };

        let current = self.read_ids(collection, id, property);
        for target in ids.iter().filter(|target| !current.contains(target)) {
            self.require_reference(foreign, target)?;
        }

        let writes: Vec<ForeignWrite> = current
            .iter()
            .filter(|target| !ids.contains(target))
            .map(|target| (target.clone(), None))
            .chain(
                ids.iter()
                    .filter(|target| !current.contains(target))
                    .map(|target| (target.clone(), Some(id.clone()))),
            )
            .collect();
        self.write_foreign(foreign, foreign_property, writes, mode)
    }

    /// Reciprocal of a one-to-one relation.
    pub(crate) fn write_one_to_one(
        &mut self,
        collection: usize,
        id: &Id,
        property: usize,
        target: Option<Id>,
        mode: WriteMode,
    ) -> Result<()> {
        let Accessor::OneToOne { foreign, property: foreign_property, .. } =
            self.schema.collection(collection).property_at(property).accessor
        else {
            return Err(self.wrong_accessor(collection, property, "a one-to-one reciprocal"));
        };

        let current = self
            .read_property(collection, id, property)
            .and_then(|value| value.as_ref_id().cloned());
        if current == target {
            return Ok(());
        }
        if let Some(target) = &target {
            self.require_reference(foreign, target)?;
        }

        let mut writes: Vec<ForeignWrite> = Vec::with_capacity(2);
        if let Some(current) = current {
            writes.push((current, None));
        }
        if let Some(target) = target {
            writes.push((target, Some(id.clone())));
        }
        self.write_foreign(foreign, foreign_property, writes, mode)
    }

    /// Apply `writes` to the `has_one` field `property` of `collection`,
    /// undoing the completed ones in reverse if any of them fails.
    fn write_foreign(
        &mut self,
        collection: usize,
        property: usize,
        writes: Vec<ForeignWrite>,
        mode: WriteMode,
    ) -> Result<()> {
        let mut journal: Vec<Undo> = Vec::with_capacity(writes.len());
        for (target, value) in writes {
            let step = self
                .stored_value(collection, &target, property)
                .and_then(|previous| {
                    self.write_has_one(collection, &target, property, value, mode)?;
                    Ok(previous)
                });
            match step {
                Ok(previous) => journal.push(Undo {
                    collection,
                    property,
                    id: target,
                    previous,
                }),
                Err(e) => {
                    self.undo(journal);
                    return Err(e);
                }
            }
        }

        if let Some(create_journal) = self.create_journal.as_mut() {
            create_journal.extend(journal);
        }
        Ok(())
    }

    /// Put back the values recorded in `journal`, newest first.
    pub(crate) fn undo(&mut self, journal: Vec<Undo>) {
        for Undo { collection, property, id, previous } in journal.into_iter().rev() {
            if !self.contains(collection, &id) {
                continue;
            }
            if let Err(e) = self.commit(collection, &id, property, previous) {
                let descriptor = self.schema.collection(collection);
                log::warn!(
                    "Failed to restore {}.{} on {id}: {e}",
                    descriptor.name,
                    descriptor.property_at(property).name
                );
            }
        }
    }

    /// Add or remove `other` in the stored id set `property` of a foreign item.
    fn patch_reciprocal(&mut self, collection: usize, target: &Id, property: usize, other: &Id, linked: bool) {
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(collection);
        let Some(slot) = descriptor.property_at(property).accessor.slot() else {
            return;
        };
        let Some(item) = self.collections[collection].items.get_mut(target) else {
            log::warn!(
                "Skipping {}.{} update: {}/{target} no longer exists",
                descriptor.name,
                descriptor.property_at(property).name,
                descriptor.name
            );
            return;
        };

        let mut ids = match item.slots[slot].take() {
            Some(Value::Refs(ids)) => ids,
            _ => Vec::new(),
        };
        if linked {
            if !ids.contains(other) {
                ids.push(other.clone());
            }
        } else {
            ids.retain(|id| id != other);
        }
        item.slots[slot] = (!ids.is_empty()).then_some(Value::Refs(ids));
    }

    fn check_required(&self, collection: usize, property: usize, clearing: bool, mode: WriteMode) -> Result<()> {
        let descriptor = self.schema.collection(collection);
        let prop = descriptor.property_at(property);
        if clearing && prop.required && mode == WriteMode::Normal {
            return Err(LinkbaseError::Validation(format!(
                "Required field '{}.{}' cannot be cleared",
                descriptor.name, prop.name
            )));
        }
        Ok(())
    }

    fn wrong_accessor(&self, collection: usize, property: usize, expected: &str) -> LinkbaseError {
        let descriptor = self.schema.collection(collection);
        LinkbaseError::Validation(format!(
            "'{}.{}' is not {expected}",
            descriptor.name,
            descriptor.property_at(property).name
        ))
    }

    /// Store `value` in the slot of `property` and bring every index over
    /// that slot up to date. Either everything changes or nothing does.
    pub(crate) fn commit(&mut self, collection: usize, id: &Id, property: usize, value: Option<Value>) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(collection);
        let prop = descriptor.property_at(property);
        let Some(slot) = prop.accessor.slot() else {
            return Err(self.wrong_accessor(collection, property, "stored"));
        };

        let storage = &mut self.collections[collection];
        let item = storage.items.get_mut(id).ok_or_else(|| LinkbaseError::NotFound {
            collection: descriptor.name.clone(),
            id: id.to_string(),
        })?;
        if item.slots[slot] == value {
            return Ok(());
        }

        if let Some(unique) = prop.unique_index {
            if let Some(key) = value.as_ref().and_then(Value::index_key) {
                let key = [Some(key)];
                if let Some(owner) = storage.indexes[unique].owner(&key) {
                    if owner != id {
                        return Err(conflict(descriptor, unique, &key, owner.clone()));
                    }
                }
            }
        }

        let before = index_keys(descriptor, &prop.indexes, item);
        let previous = std::mem::replace(&mut item.slots[slot], value);
        let after = index_keys(descriptor, &prop.indexes, item);

        let mut inserted: Vec<usize> = Vec::with_capacity(prop.indexes.len());
        for (n, &index) in prop.indexes.iter().enumerate() {
            if before[n] == after[n] {
                continue;
            }
            if let Err(Conflict { existing }) = storage.indexes[index].insert(&after[n], id) {
                for &m in inserted.iter().rev() {
                    storage.indexes[prop.indexes[m]].remove(&after[m], id);
                }
                item.slots[slot] = previous;
                return Err(conflict(descriptor, index, &after[n], existing));
            }
            inserted.push(n);
        }
        for n in inserted {
            storage.indexes[prop.indexes[n]].remove(&before[n], id);
        }
        Ok(())
    }
}

/// The key of each of `indexes` as currently read from `item`.
fn index_keys(descriptor: &CollectionDescriptor, indexes: &[usize], item: &Item) -> Vec<Vec<Option<IndexKey>>> {
    indexes
        .iter()
        .map(|&index| {
            descriptor
                .index_at(index)
                .components
                .iter()
                .map(|&slot| item.slot(slot).and_then(Value::index_key))
                .collect()
        })
        .collect()
}

fn conflict(descriptor: &CollectionDescriptor, index: usize, key: &[Option<IndexKey>], owner: Id) -> LinkbaseError {
    let key = match key {
        [Some(single)] => single.to_string(),
        _ => describe_key(key),
    };
    LinkbaseError::UniqueConstraintViolation {
        collection: descriptor.name.clone(),
        index: descriptor.index_at(index).name.clone(),
        key,
        owner,
    }
}
