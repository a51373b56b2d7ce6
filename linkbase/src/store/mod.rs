mod operators;
mod pipeline;

pub(crate) use pipeline::WriteMode;
use pipeline::Undo;

use crate::error::{LinkbaseError, Result};
use crate::id::Id;
use crate::index::IndexStore;
use crate::relation::{ManyToManySet, ManyToOneSet, RelationSet};
use crate::schema::{
    parse_schema, parse_schema_str, Accessor, CollectionDescriptor, CompiledSchema, SchemaDefinition,
};
use crate::update_log::{Quintuple, UpdateBatch, Version};
use crate::value::{get_in, IndexKey, PropertyPath, Value};
use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use std::path::Path;
use std::sync::Arc;

/// The main entry point for linkbase.
/// Holds one arena of items per collection together with the collection's
/// installed indexes, all wired up by the compiled schema.
#[derive(Debug, Clone)]
pub struct Database {
    schema: Arc<CompiledSchema>,
    collections: Vec<Collection>,
    /// Foreign writes made while an item is being created, undone if the
    /// create fails.
    create_journal: Option<Vec<Undo>>,
}

/// Storage of one collection: items in insertion order, and the index table
/// laid out as in the collection descriptor.
#[derive(Debug, Clone, Default)]
struct Collection {
    items: IndexMap<Id, Item>,
    indexes: Vec<IndexStore>,
}

/// One stored item: its id and one write slot per stored property.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    id: Id,
    slots: Vec<Option<Value>>,
}

impl Item {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn slot(&self, slot: usize) -> Option<&Value> {
        self.slots.get(slot).and_then(Option::as_ref)
    }
}

impl Database {
    /// Compile `definition` and build an empty database for it.
    pub fn new(definition: &SchemaDefinition) -> Result<Self> {
        let schema = CompiledSchema::compile(definition)?;
        let collections = schema
            .collections()
            .map(|descriptor| Collection {
                items: IndexMap::new(),
                indexes: descriptor
                    .indexes
                    .values()
                    .map(|index| IndexStore::new(index.kind, index.components.len()))
                    .collect(),
            })
            .collect();

        log::info!(
            "Built database with {} collections: {}",
            schema.len(),
            schema.collections().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        Ok(Database {
            schema: Arc::new(schema),
            collections,
            create_journal: None,
        })
    }

    /// Build a database from a schema YAML file.
    pub fn open(path: &Path) -> Result<Self> {
        Database::new(&parse_schema(path)?)
    }

    /// Build a database from schema YAML text.
    pub fn from_schema_str(yaml: &str) -> Result<Self> {
        Database::new(&parse_schema_str(yaml)?)
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    /// Read access to a collection by name.
    pub fn collection(&self, name: &str) -> Result<CollectionRef<'_>> {
        let position = self.schema.require_collection(name)?;
        Ok(CollectionRef { db: self, position })
    }

    pub fn collections(&self) -> impl Iterator<Item = CollectionRef<'_>> {
        (0..self.collections.len()).map(move |position| CollectionRef { db: self, position })
    }

    // ── Item lifecycle ─────────────────────────────────────────────

    /// Create an item from `data`. The id is taken from `data.id` when present,
    /// otherwise generated. Returns the id.
    pub fn insert(&mut self, collection: &str, data: &Json) -> Result<Id> {
        let position = self.schema.require_collection(collection)?;
        let id = match data.get("id").and_then(Json::as_str) {
            Some(raw) => Id::parse(raw)?,
            None => Id::generate(),
        };
        self.create_item(position, id.clone(), data)?;
        Ok(id)
    }

    /// Create an item under a caller-chosen id. Fails if the id is taken.
    pub fn create(&mut self, collection: &str, id: &Id, data: &Json) -> Result<()> {
        let position = self.schema.require_collection(collection)?;
        self.create_item(position, id.clone(), data)
    }

    /// Create the item if absent, otherwise overwrite every stored field:
    /// fields missing from `data` fall back to their default or are cleared.
    pub fn replace(&mut self, collection: &str, id: &Id, data: &Json) -> Result<()> {
        let position = self.schema.require_collection(collection)?;
        self.replace_item(position, id, data)
    }

    /// Delete an item, tearing down its indexes and relations. Returns false
    /// if there was no such item.
    pub fn delete(&mut self, collection: &str, id: &Id) -> Result<bool> {
        let position = self.schema.require_collection(collection)?;
        self.delete_item(position, id)
    }

    /// Delete every item of a collection. Returns how many were deleted.
    pub fn clear(&mut self, collection: &str) -> Result<usize> {
        let position = self.schema.require_collection(collection)?;
        self.clear_collection(position)
    }

    // ── Property writes ────────────────────────────────────────────

    /// Set the property at `path` (dotted paths descend into object fields).
    /// A JSON null clears it.
    pub fn set(&mut self, collection: &str, id: &Id, path: &str, value: &Json) -> Result<()> {
        let position = self.schema.require_collection(collection)?;
        self.require_item(position, id)?;
        let path = PropertyPath::parse(path)?;
        self.write_path(position, id, &path, Some(value).filter(|v| !v.is_null()))
    }

    pub fn unset(&mut self, collection: &str, id: &Id, path: &str) -> Result<()> {
        let position = self.schema.require_collection(collection)?;
        self.require_item(position, id)?;
        let path = PropertyPath::parse(path)?;
        self.write_path(position, id, &path, None)
    }

    /// Numeric add, date shift (milliseconds), string append, array push, or
    /// set/relation membership add.
    pub fn add(&mut self, collection: &str, id: &Id, path: &str, value: &Json) -> Result<()> {
        let position = self.schema.require_collection(collection)?;
        self.require_item(position, id)?;
        let path = PropertyPath::parse(path)?;
        self.apply_delta(position, id, &path, value, operators::Delta::Add)
    }

    /// The inverse of [`add`](Self::add). Strings and arrays lose their last
    /// matching occurrence.
    pub fn subtract(&mut self, collection: &str, id: &Id, path: &str, value: &Json) -> Result<()> {
        let position = self.schema.require_collection(collection)?;
        self.require_item(position, id)?;
        let path = PropertyPath::parse(path)?;
        self.apply_delta(position, id, &path, value, operators::Delta::Subtract)
    }

    /// A mutable view of one item's id-set relation (a many-to-many field or
    /// the reciprocal of a one-to-many relation).
    pub fn relation_set(&mut self, collection: &str, id: &Id, property: &str) -> Result<RelationSet<'_>> {
        let position = self.schema.require_collection(collection)?;
        self.require_item(position, id)?;
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(position);
        let (property, found) = descriptor.require_property(property)?;

        match found.accessor {
            Accessor::HasMany { .. } => Ok(RelationSet::ManyToMany(ManyToManySet::new(
                self,
                position,
                id.clone(),
                property,
            ))),
            Accessor::ManyToOne { .. } => Ok(RelationSet::ManyToOne(ManyToOneSet::new(
                self,
                position,
                id.clone(),
                property,
            ))),
            _ => Err(LinkbaseError::Validation(format!(
                "'{}.{}' is not an id-set relation",
                descriptor.name, found.name
            ))),
        }
    }

    /// Render the whole database as one update batch that rebuilds it on an
    /// empty instance: a version handshake, then every item created with its
    /// plain (and required relation) fields, then the remaining relation
    /// fields once every target exists.
    pub fn snapshot(&self) -> UpdateBatch {
        let mut batch = UpdateBatch::new();
        batch.push(Quintuple::version(&Version::current()));

        let order = self.schema.creation_order();
        for &position in &order {
            let collection = self.collection_at(position);
            for item in collection.items() {
                let data = item.render(|property| !property.accessor.is_relation() || property.required);
                batch.push(Quintuple::assign(collection.name(), Some(item.id().clone()), None, Some(data)));
            }
        }

        for &position in &order {
            let collection = self.collection_at(position);
            for item in collection.items() {
                for (_, property) in collection.descriptor().stored() {
                    if !property.accessor.is_relation() || property.required {
                        continue;
                    }
                    if let Some(value) = item.read(property) {
                        batch.push(Quintuple::assign(
                            collection.name(),
                            Some(item.id().clone()),
                            Some(property.name.clone()),
                            Some(value.to_json()),
                        ));
                    }
                }
            }
        }

        batch
    }

    // ── Internals shared with the pipeline and relation sets ────────

    fn collection_at(&self, position: usize) -> CollectionRef<'_> {
        CollectionRef { db: self, position }
    }

    pub(crate) fn contains(&self, collection: usize, id: &Id) -> bool {
        self.collections[collection].items.contains_key(id)
    }

    pub(crate) fn require_item(&self, collection: usize, id: &Id) -> Result<&Item> {
        self.collections[collection].items.get(id).ok_or_else(|| LinkbaseError::NotFound {
            collection: self.schema.collection(collection).name.clone(),
            id: id.to_string(),
        })
    }

    /// Like [`require_item`](Self::require_item) but for relation targets.
    pub(crate) fn require_reference(&self, collection: usize, id: &Id) -> Result<()> {
        if self.contains(collection, id) {
            return Ok(());
        }
        Err(LinkbaseError::UnknownReference {
            collection: self.schema.collection(collection).name.clone(),
            id: id.to_string(),
        })
    }

    /// The read view of `property`, or `None` when unset or the item is gone.
    pub(crate) fn read_property(&self, collection: usize, id: &Id, property: usize) -> Option<Value> {
        let item = self.collections[collection].items.get(id)?;
        ItemRef {
            db: self,
            position: collection,
            item,
        }
        .read(self.schema.collection(collection).property_at(property))
    }

    /// The ids an id-set property currently links to.
    pub(crate) fn read_ids(&self, collection: usize, id: &Id, property: usize) -> Vec<Id> {
        match self.read_property(collection, id, property) {
            Some(Value::Refs(ids)) => ids,
            Some(Value::Ref(id)) => vec![id],
            _ => Vec::new(),
        }
    }

    /// The raw stored value of `property` (including dangling references).
    pub(crate) fn stored_value(&self, collection: usize, id: &Id, property: usize) -> Result<Option<Value>> {
        let item = self.require_item(collection, id)?;
        let slot = self.schema.collection(collection).property_at(property).accessor.slot();
        Ok(slot.and_then(|slot| item.slot(slot)).cloned())
    }

    fn create_item(&mut self, collection: usize, id: Id, data: &Json) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(collection);
        if self.contains(collection, &id) {
            return Err(LinkbaseError::Validation(format!(
                "Item {}/{id} already exists",
                descriptor.name
            )));
        }
        crate::validation::validate_payload(descriptor, data).into_result()?;

        self.collections[collection].items.insert(
            id.clone(),
            Item {
                id: id.clone(),
                slots: vec![None; descriptor.slots],
            },
        );

        let outer = self.create_journal.replace(Vec::new());
        let populated = self.populate(collection, &id, data, false);
        let journal = std::mem::replace(&mut self.create_journal, outer).unwrap_or_default();

        if let Err(e) = populated {
            if let Err(teardown) = self.destroy(collection, &id) {
                log::warn!("Failed to tear down {}/{id} after a failed create: {teardown}", descriptor.name);
            }
            self.undo(journal);
            return Err(e);
        }
        if let Some(outer) = self.create_journal.as_mut() {
            outer.extend(journal);
        }

        log::debug!("Created {}/{id}", descriptor.name);
        Ok(())
    }

    fn replace_item(&mut self, collection: usize, id: &Id, data: &Json) -> Result<()> {
        if !self.contains(collection, id) {
            return self.create_item(collection, id.clone(), data);
        }
        let descriptor = self.schema.collection(collection);
        crate::validation::validate_payload(descriptor, data).into_result()?;
        self.populate(collection, id, data, true)
    }

    /// Write every property named in `data`. Stored properties it omits get
    /// their default; on a replace, omitted stored properties without one
    /// are cleared.
    fn populate(&mut self, collection: usize, id: &Id, data: &Json, replace: bool) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(collection);
        let empty = Map::new();
        let map = data.as_object().unwrap_or(&empty);

        for (position, property) in descriptor.properties.values().enumerate() {
            match map.get(&property.name).filter(|v| !v.is_null()) {
                Some(raw) => self.write_property(collection, id, position, Some(raw), WriteMode::Normal)?,
                None if !property.accessor.is_stored() => {}
                None => match &property.default {
                    Some(default) => self.write_value(collection, id, position, Some(default.clone()), WriteMode::Normal)?,
                    None if replace => self.write_property(collection, id, position, None, WriteMode::Normal)?,
                    None => {}
                },
            }
        }
        Ok(())
    }

    fn delete_item(&mut self, collection: usize, id: &Id) -> Result<bool> {
        if !self.contains(collection, id) {
            return Ok(false);
        }
        self.destroy(collection, id)?;
        log::debug!("Deleted {}/{id}", self.schema.collection(collection).name);
        Ok(true)
    }

    fn clear_collection(&mut self, collection: usize) -> Result<usize> {
        let ids: Vec<Id> = self.collections[collection].items.keys().cloned().collect();
        let mut deleted = 0;
        for id in ids {
            // Relation teardown of an earlier item never removes a later one.
            if self.delete_item(collection, &id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Clear every property (last declared first) and drop the item.
    fn destroy(&mut self, collection: usize, id: &Id) -> Result<()> {
        let properties = self.schema.collection(collection).properties.len();
        for position in (0..properties).rev() {
            self.write_property(collection, id, position, None, WriteMode::Teardown)?;
        }
        self.collections[collection].items.shift_remove(id);
        Ok(())
    }

    fn write_path(&mut self, collection: usize, id: &Id, path: &PropertyPath, raw: Option<&Json>) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(collection);
        let (position, _) = descriptor.require_property(path.property())?;

        if !path.is_nested() {
            return self.write_property(collection, id, position, raw, WriteMode::Normal);
        }

        let mut root = self.object_root(descriptor, collection, id, position)?;
        crate::value::set_in(&mut root, path.nested(), raw.cloned())?;
        self.write_property(collection, id, position, Some(&root), WriteMode::Normal)
    }

    /// Current value of an object-like field to descend into, or an empty object.
    fn object_root(
        &self,
        descriptor: &CollectionDescriptor,
        collection: usize,
        id: &Id,
        position: usize,
    ) -> Result<Json> {
        let property = descriptor.property_at(position);
        let descends = matches!(property.accessor, Accessor::Scalar { .. })
            && matches!(
                property.field_type,
                Some(crate::schema::FieldType::Object) | Some(crate::schema::FieldType::Any)
            );
        if !descends {
            return Err(LinkbaseError::Validation(format!(
                "Cannot descend into '{}.{}'",
                descriptor.name, property.name
            )));
        }
        Ok(match self.stored_value(collection, id, position)? {
            Some(Value::Json(json)) => json,
            _ => Json::Object(Map::new()),
        })
    }
}

// ── Read views ─────────────────────────────────────────────────

/// A read-only handle to one collection.
#[derive(Clone, Copy)]
pub struct CollectionRef<'a> {
    db: &'a Database,
    position: usize,
}

impl<'a> CollectionRef<'a> {
    pub fn name(&self) -> &'a str {
        &self.descriptor().name
    }

    pub fn descriptor(&self) -> &'a CollectionDescriptor {
        self.db.schema.collection(self.position)
    }

    fn storage(&self) -> &'a Collection {
        &self.db.collections[self.position]
    }

    pub fn len(&self) -> usize {
        self.storage().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage().items.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.storage().items.contains_key(id)
    }

    pub fn get(&self, id: &Id) -> Option<ItemRef<'a>> {
        let db = self.db;
        let position = self.position;
        self.storage()
            .items
            .get(id)
            .map(|item| ItemRef { db, position, item })
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &'a Id> {
        self.storage().items.keys()
    }

    pub fn items(&self) -> impl Iterator<Item = ItemRef<'a>> {
        let db = self.db;
        let position = self.position;
        self.storage()
            .items
            .values()
            .map(move |item| ItemRef { db, position, item })
    }

    /// The index named `name`: a field name for single-field and relation
    /// indexes, or the declared name of a composite index.
    pub fn by(&self, name: &str) -> Result<&'a IndexStore> {
        let position = self.descriptor().indexes.get_index_of(name).ok_or_else(|| {
            LinkbaseError::IndexNotFound {
                collection: self.descriptor().name.clone(),
                index: name.to_string(),
            }
        })?;
        Ok(&self.storage().indexes[position])
    }

    /// Ids stored under a key of the index `name`.
    pub fn lookup(&self, name: &str, keys: &[IndexKey]) -> Result<Vec<ItemRef<'a>>> {
        let index = self.by(name)?;
        Ok(index.lookup(keys).into_iter().filter_map(|id| self.get(id)).collect())
    }

    /// Every item rendered as by [`ItemRef::to_json`].
    pub fn export(&self) -> Vec<Json> {
        self.items().map(|item| item.to_json()).collect()
    }
}

impl std::fmt::Debug for CollectionRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRef")
            .field("name", &self.name())
            .field("len", &self.len())
            .finish()
    }
}

/// A read-only handle to one item.
#[derive(Clone, Copy)]
pub struct ItemRef<'a> {
    db: &'a Database,
    position: usize,
    item: &'a Item,
}

impl<'a> ItemRef<'a> {
    pub fn id(&self) -> &'a Id {
        &self.item.id
    }

    /// The observable value of `property`. Relation fields resolve through
    /// their target collection: references to deleted items read as absent,
    /// and reciprocal views are computed from the foreign index.
    pub fn get(&self, property: &str) -> Result<Option<Value>> {
        let descriptor = self.db.schema.collection(self.position);
        let (_, property) = descriptor.require_property(property)?;
        Ok(self.read(property))
    }

    /// Read a dotted path as JSON; nested segments descend into object values.
    pub fn get_json(&self, path: &str) -> Result<Option<Json>> {
        let path = PropertyPath::parse(path)?;
        let Some(value) = self.get(path.property())? else {
            return Ok(None);
        };
        let json = value.to_json();
        Ok(get_in(&json, path.nested()).cloned())
    }

    /// The item as a JSON object: its id and every defined stored field.
    pub fn to_json(&self) -> Json {
        self.render(|_| true)
    }

    fn render(&self, include: impl Fn(&crate::schema::PropertyDescriptor) -> bool) -> Json {
        let descriptor = self.db.schema.collection(self.position);
        let mut map = Map::new();
        map.insert("id".into(), Json::String(self.item.id.to_string()));
        for (_, property) in descriptor.stored() {
            if !include(property) {
                continue;
            }
            if let Some(value) = self.read(property) {
                map.insert(property.name.clone(), value.to_json());
            }
        }
        Json::Object(map)
    }

    fn read(&self, property: &crate::schema::PropertyDescriptor) -> Option<Value> {
        let db = self.db;
        let id = &self.item.id;
        match property.accessor {
            Accessor::Scalar { slot } => self.item.slot(slot).cloned(),
            Accessor::HasOne { slot, foreign } => self
                .item
                .slot(slot)
                .and_then(Value::as_ref_id)
                .filter(|target| db.contains(foreign, target))
                .map(|target| Value::Ref(target.clone())),
            Accessor::HasMany { slot, foreign, .. } => {
                let live: Vec<Id> = self
                    .item
                    .slot(slot)
                    .map(Value::ref_ids)
                    .unwrap_or_default()
                    .iter()
                    .filter(|target| db.contains(foreign, target))
                    .cloned()
                    .collect();
                (!live.is_empty()).then_some(Value::Refs(live))
            }
            Accessor::ManyToOne { foreign, index, .. } => {
                let linked: Vec<Id> = db.collections[foreign].indexes[index]
                    .lookup(&[IndexKey::from(id)])
                    .into_iter()
                    .cloned()
                    .collect();
                (!linked.is_empty()).then_some(Value::Refs(linked))
            }
            Accessor::OneToOne { foreign, index, .. } => db.collections[foreign].indexes[index]
                .owner(&[Some(IndexKey::from(id))])
                .cloned()
                .map(Value::Ref),
        }
    }
}

impl std::fmt::Debug for ItemRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemRef").field("item", self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = r#"
collections:
  users:
    fields:
      name: { type: string, required: true }
      role: { type: string, enum: [admin, member], default: member, index: true }
      email: { type: string, unique: true }
"#;

    #[test]
    fn test_insert_uses_given_or_generated_id() {
        let mut db = Database::from_schema_str(SCHEMA).unwrap();
        let given = Id::parse("5F2B6E1C9A3D4B0012AB34CD").unwrap();
        let id = db.insert("users", &json!({ "id": given.as_str(), "name": "A" })).unwrap();
        assert_eq!(id, given);
        let other = db.insert("users", &json!({ "name": "B" })).unwrap();
        assert_ne!(other, given);

        let users = db.collection("users").unwrap();
        assert_eq!(users.ids().cloned().collect::<Vec<_>>(), vec![given, other]);
        assert!(db.insert("users", &json!({ "id": "short", "name": "C" })).is_err());
    }

    #[test]
    fn test_create_rejects_existing_id() {
        let mut db = Database::from_schema_str(SCHEMA).unwrap();
        let id = Id::generate();
        db.create("users", &id, &json!({ "name": "A" })).unwrap();
        assert!(db.create("users", &id, &json!({ "name": "B" })).is_err());
        assert_eq!(db.collection("users").unwrap().len(), 1);
    }

    #[test]
    fn test_defaults_are_indexed() {
        let mut db = Database::from_schema_str(SCHEMA).unwrap();
        db.insert("users", &json!({ "name": "A" })).unwrap();
        db.insert("users", &json!({ "name": "B", "role": "admin" })).unwrap();

        let users = db.collection("users").unwrap();
        let members = users.lookup("role", &[IndexKey::from("member")]).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].get_json("name").unwrap(), Some(json!("A")));
        assert!(matches!(users.by("nope"), Err(LinkbaseError::IndexNotFound { .. })));
    }

    #[test]
    fn test_clear_removes_index_entries() {
        let mut db = Database::from_schema_str(SCHEMA).unwrap();
        db.insert("users", &json!({ "name": "A", "email": "a@x" })).unwrap();
        db.insert("users", &json!({ "name": "B", "email": "b@x" })).unwrap();
        assert_eq!(db.clear("users").unwrap(), 2);

        let users = db.collection("users").unwrap();
        assert!(users.is_empty());
        assert_eq!(users.by("email").unwrap().count(), 0);
        assert_eq!(users.by("role").unwrap().size(), 0);
        assert!(!db.delete("users", &Id::generate()).unwrap());
    }

    #[test]
    fn test_unknown_collection() {
        let mut db = Database::from_schema_str(SCHEMA).unwrap();
        assert!(matches!(
            db.insert("ghosts", &json!({})),
            Err(LinkbaseError::CollectionNotFound(_))
        ));
    }
}
