//! Mutable set views over an item's id-set relations.
//!
//! A [`ManyToOneSet`] edits the reciprocal of a one-to-many relation: adding
//! `x` points `x`'s `has_one` field at the owner. A [`ManyToManySet`] edits a
//! stored `has_many` field and, through it, the reciprocal field on the other
//! side. Both hold the database mutably for as long as they live.

use crate::error::Result;
use crate::id::Id;
use crate::schema::Accessor;
use crate::store::{Database, WriteMode};

/// Reciprocal side of a one-to-many relation.
#[derive(Debug)]
pub struct ManyToOneSet<'db> {
    db: &'db mut Database,
    collection: usize,
    owner: Id,
    property: usize,
}

impl<'db> ManyToOneSet<'db> {
    pub(crate) fn new(db: &'db mut Database, collection: usize, owner: Id, property: usize) -> Self {
        ManyToOneSet {
            db,
            collection,
            owner,
            property,
        }
    }

    pub fn owner(&self) -> &Id {
        &self.owner
    }

    pub fn ids(&self) -> Vec<Id> {
        self.db.read_ids(self.collection, &self.owner, self.property)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.ids().contains(id)
    }

    /// Link `id` to the owner, moving it away from any previous owner.
    /// Returns false if it was already linked here.
    pub fn add(&mut self, id: &Id) -> Result<bool> {
        if self.contains(id) {
            return Ok(false);
        }
        let (foreign, property) = self.foreign_side();
        self.db.require_reference(foreign, id)?;
        self.db
            .write_has_one(foreign, id, property, Some(self.owner.clone()), WriteMode::Normal)?;
        Ok(true)
    }

    /// Unlink `id`, clearing its `has_one` field. Returns false if it was not linked.
    pub fn delete(&mut self, id: &Id) -> Result<bool> {
        if !self.contains(id) {
            return Ok(false);
        }
        let (foreign, property) = self.foreign_side();
        self.db.write_has_one(foreign, id, property, None, WriteMode::Normal)?;
        Ok(true)
    }

    /// Unlink every member. Returns how many were unlinked.
    pub fn clear(&mut self) -> Result<usize> {
        let count = self.len();
        self.db
            .write_many_to_one(self.collection, &self.owner, self.property, Vec::new(), WriteMode::Normal)?;
        Ok(count)
    }

    fn foreign_side(&self) -> (usize, usize) {
        match self.db.schema().collection(self.collection).property_at(self.property).accessor {
            Accessor::ManyToOne { foreign, property, .. } => (foreign, property),
            // Only built over many-to-one views.
            _ => (self.collection, self.property),
        }
    }
}

/// A stored `has_many` relation, kept in sync with its reciprocal if any.
#[derive(Debug)]
pub struct ManyToManySet<'db> {
    db: &'db mut Database,
    collection: usize,
    owner: Id,
    property: usize,
}

impl<'db> ManyToManySet<'db> {
    pub(crate) fn new(db: &'db mut Database, collection: usize, owner: Id, property: usize) -> Self {
        ManyToManySet {
            db,
            collection,
            owner,
            property,
        }
    }

    pub fn owner(&self) -> &Id {
        &self.owner
    }

    /// Members in insertion order; references to deleted items are skipped.
    pub fn ids(&self) -> Vec<Id> {
        self.db.read_ids(self.collection, &self.owner, self.property)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.ids().contains(id)
    }

    pub fn add(&mut self, id: &Id) -> Result<bool> {
        let mut ids = self.ids();
        if ids.contains(id) {
            return Ok(false);
        }
        ids.push(id.clone());
        self.write(ids)?;
        Ok(true)
    }

    pub fn delete(&mut self, id: &Id) -> Result<bool> {
        let mut ids = self.ids();
        let before = ids.len();
        ids.retain(|member| member != id);
        if ids.len() == before {
            return Ok(false);
        }
        self.write(ids)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<usize> {
        let count = self.len();
        self.write(Vec::new())?;
        Ok(count)
    }

    fn write(&mut self, ids: Vec<Id>) -> Result<()> {
        self.db
            .write_has_many(self.collection, &self.owner, self.property, ids, WriteMode::Normal)
    }
}

/// Either kind of id-set relation, as handed out by
/// [`Database::relation_set`].
#[derive(Debug)]
pub enum RelationSet<'db> {
    ManyToOne(ManyToOneSet<'db>),
    ManyToMany(ManyToManySet<'db>),
}

impl RelationSet<'_> {
    pub fn ids(&self) -> Vec<Id> {
        match self {
            RelationSet::ManyToOne(set) => set.ids(),
            RelationSet::ManyToMany(set) => set.ids(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.ids().contains(id)
    }

    pub fn add(&mut self, id: &Id) -> Result<bool> {
        match self {
            RelationSet::ManyToOne(set) => set.add(id),
            RelationSet::ManyToMany(set) => set.add(id),
        }
    }

    pub fn delete(&mut self, id: &Id) -> Result<bool> {
        match self {
            RelationSet::ManyToOne(set) => set.delete(id),
            RelationSet::ManyToMany(set) => set.delete(id),
        }
    }

    pub fn clear(&mut self) -> Result<usize> {
        match self {
            RelationSet::ManyToOne(set) => set.clear(),
            RelationSet::ManyToMany(set) => set.clear(),
        }
    }
}
