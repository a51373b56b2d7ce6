//! Compiles a [`SchemaDefinition`] into per-collection descriptor tables.
//!
//! Every property gets a fixed write slot in its items (stored properties
//! only) and an [`Accessor`] the write pipeline dispatches on. Relations
//! install their reciprocal property on the foreign collection, and every
//! index gets a position in its collection's index table.

use super::types::{CollectionDefinition, FieldDefinition, FieldType, RelationDefinition, SchemaDefinition};
use crate::error::{LinkbaseError, Result};
use crate::index::IndexKind;
use crate::validation;
use crate::value::Value;
use indexmap::IndexMap;
use regex::Regex;

/// How a property is read and written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// A plain typed value.
    Scalar { slot: usize },
    /// One id of `foreign`. One-to-many and one-to-one relations keep an
    /// index over this slot that backs the foreign reciprocal view.
    HasOne { slot: usize, foreign: usize },
    /// A set of ids of `foreign`. With a reciprocal, the foreign property is
    /// a stored id set kept in sync (many-to-many).
    HasMany {
        slot: usize,
        foreign: usize,
        reciprocal: Option<usize>,
    },
    /// Reciprocal of a one-to-many relation: the items of `foreign` whose
    /// `property` points here, read from `foreign`'s index.
    ManyToOne {
        foreign: usize,
        property: usize,
        index: usize,
    },
    /// Reciprocal of a one-to-one relation.
    OneToOne {
        foreign: usize,
        property: usize,
        index: usize,
    },
}

impl Accessor {
    /// The write slot, for stored properties.
    pub fn slot(&self) -> Option<usize> {
        match self {
            Accessor::Scalar { slot }
            | Accessor::HasOne { slot, .. }
            | Accessor::HasMany { slot, .. } => Some(*slot),
            Accessor::ManyToOne { .. } | Accessor::OneToOne { .. } => None,
        }
    }

    pub fn is_stored(&self) -> bool {
        self.slot().is_some()
    }

    pub fn is_relation(&self) -> bool {
        !matches!(self, Accessor::Scalar { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    /// Declared type of a plain field; `None` for relations.
    pub field_type: Option<FieldType>,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<String>>,
    pub accessor: Accessor,
    /// Positions of every index whose key reads this property's slot.
    pub indexes: Vec<usize>,
    /// Position of the property's own single-field unique index.
    pub unique_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    /// Write slots forming the key, in component order.
    pub components: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CollectionDescriptor {
    pub name: String,
    pub properties: IndexMap<String, PropertyDescriptor>,
    pub indexes: IndexMap<String, IndexDescriptor>,
    pub slots: usize,
}

impl CollectionDescriptor {
    pub fn property(&self, name: &str) -> Option<(usize, &PropertyDescriptor)> {
        self.properties.get_full(name).map(|(position, _, property)| (position, property))
    }

    /// Look up a property, failing with `PropertyNotFound`.
    pub fn require_property(&self, name: &str) -> Result<(usize, &PropertyDescriptor)> {
        self.property(name).ok_or_else(|| LinkbaseError::PropertyNotFound {
            collection: self.name.clone(),
            property: name.to_string(),
        })
    }

    pub fn property_at(&self, position: usize) -> &PropertyDescriptor {
        &self.properties[position]
    }

    pub fn index_at(&self, position: usize) -> &IndexDescriptor {
        &self.indexes[position]
    }

    /// Stored properties in declaration order.
    pub fn stored(&self) -> impl Iterator<Item = (usize, &PropertyDescriptor)> {
        self.properties
            .values()
            .enumerate()
            .filter(|(_, property)| property.accessor.is_stored())
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSchema {
    collections: IndexMap<String, CollectionDescriptor>,
}

impl CompiledSchema {
    pub fn compile(definition: &SchemaDefinition) -> Result<Self> {
        Compiler::new(definition)?.run()
    }

    pub fn collection_index(&self, name: &str) -> Option<usize> {
        self.collections.get_index_of(name)
    }

    pub fn require_collection(&self, name: &str) -> Result<usize> {
        self.collection_index(name)
            .ok_or_else(|| LinkbaseError::CollectionNotFound(name.to_string()))
    }

    pub fn collection(&self, position: usize) -> &CollectionDescriptor {
        &self.collections[position]
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionDescriptor> {
        self.collections.values()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Collections ordered so that the targets of required `has_one`
    /// relations come before the collections pointing at them. Cycles are
    /// broken at the first revisit.
    pub fn creation_order(&self) -> Vec<usize> {
        fn visit(schema: &CompiledSchema, position: usize, seen: &mut Vec<bool>, order: &mut Vec<usize>) {
            if seen[position] {
                return;
            }
            seen[position] = true;
            for property in schema.collection(position).properties.values() {
                if let Accessor::HasOne { foreign, .. } = property.accessor {
                    if property.required {
                        visit(schema, foreign, seen, order);
                    }
                }
            }
            order.push(position);
        }

        let mut seen = vec![false; self.len()];
        let mut order = Vec::with_capacity(self.len());
        for position in 0..self.len() {
            visit(self, position, &mut seen, &mut order);
        }
        order
    }
}

// ── Compilation ────────────────────────────────────────────────

const NAME_PATTERN: &str = r"^[A-Za-z_$][A-Za-z0-9_$]*$";

fn syntax(message: impl Into<String>) -> LinkbaseError {
    LinkbaseError::SchemaSyntax(message.into())
}

/// A reciprocal property waiting to be installed on a foreign collection.
struct PendingReciprocal {
    target: usize,
    name: String,
    source: usize,
    property: usize,
    kind: ReciprocalKind,
}

enum ReciprocalKind {
    ManyToOne { index: usize },
    OneToOne { index: usize },
    ManyToMany,
}

struct Compiler<'a> {
    definition: &'a SchemaDefinition,
    names: Regex,
    collections: IndexMap<String, CollectionDescriptor>,
    pending: Vec<PendingReciprocal>,
}

impl<'a> Compiler<'a> {
    fn new(definition: &'a SchemaDefinition) -> Result<Self> {
        let names = Regex::new(NAME_PATTERN).map_err(|e| syntax(e.to_string()))?;
        let mut collections = IndexMap::new();
        for name in definition.collections.keys() {
            if !names.is_match(name) {
                return Err(syntax(format!("Illegal collection name '{name}'")));
            }
            if name.starts_with('_') {
                return Err(syntax(format!("Collection name '{name}' must not start with '_'")));
            }
            collections.insert(
                name.clone(),
                CollectionDescriptor {
                    name: name.clone(),
                    properties: IndexMap::new(),
                    indexes: IndexMap::new(),
                    slots: 0,
                },
            );
        }
        Ok(Compiler {
            definition,
            names,
            collections,
            pending: Vec::new(),
        })
    }

    fn run(mut self) -> Result<CompiledSchema> {
        let definition = self.definition;
        for (position, collection) in definition.collections.values().enumerate() {
            for (name, field) in &collection.fields {
                self.add_field(position, name, field)?;
            }
        }

        for pending in std::mem::take(&mut self.pending) {
            self.install_reciprocal(pending)?;
        }

        for (position, collection) in definition.collections.values().enumerate() {
            self.add_composites(position, collection)?;
        }

        Ok(CompiledSchema {
            collections: self.collections,
        })
    }

    fn add_field(&mut self, position: usize, name: &str, field: &FieldDefinition) -> Result<()> {
        let collection = self.collections[position].name.clone();
        self.check_property_name(&collection, name)?;

        if field.unique && field.index {
            return Err(syntax(format!(
                "Property '{collection}.{name}' cannot be both unique and index"
            )));
        }

        match (&field.has_one, &field.has_many) {
            (Some(_), Some(_)) => Err(syntax(format!(
                "Property '{collection}.{name}' cannot declare both has_one and has_many"
            ))),
            (Some(relation), None) => self.add_has_one(position, name, field, relation),
            (None, Some(relation)) => self.add_has_many(position, name, field, relation),
            (None, None) => self.add_scalar(position, name, field),
        }
    }

    fn add_scalar(&mut self, position: usize, name: &str, field: &FieldDefinition) -> Result<()> {
        let collection = self.collections[position].name.clone();
        let field_type = field.field_type.unwrap_or(FieldType::Any);

        if (field.unique || field.index) && !field_type.is_indexable() {
            return Err(syntax(format!(
                "Property '{collection}.{name}' of type {} cannot be indexed",
                field_type.name()
            )));
        }
        if field.enum_values.is_some() && field_type != FieldType::String {
            return Err(syntax(format!(
                "Property '{collection}.{name}': enum is only allowed on string fields"
            )));
        }

        let default = match &field.default {
            Some(raw) => Some(
                validation::coerce_value(&collection, name, field_type, field.enum_values.as_deref(), raw)
                    .map_err(|e| syntax(format!("Invalid default for '{collection}.{name}': {e}")))?,
            ),
            None => None,
        };

        let slot = self.next_slot(position);
        let property = self.push_property(
            position,
            PropertyDescriptor {
                name: name.to_string(),
                field_type: Some(field_type),
                required: field.required,
                default,
                enum_values: field.enum_values.clone(),
                accessor: Accessor::Scalar { slot },
                indexes: Vec::new(),
                unique_index: None,
            },
        );

        if field.unique {
            self.add_own_index(position, property, IndexKind::Unique)?;
        } else if field.index {
            self.add_own_index(position, property, IndexKind::Multi)?;
        }
        Ok(())
    }

    fn add_has_one(
        &mut self,
        position: usize,
        name: &str,
        field: &FieldDefinition,
        relation: &RelationDefinition,
    ) -> Result<()> {
        let collection = self.collections[position].name.clone();
        let foreign = self.relation_target(&collection, name, field, relation)?;

        let kind = match (&relation.has_one, &relation.has_many) {
            (Some(_), Some(_)) => {
                return Err(syntax(format!(
                    "Relation '{collection}.{name}' names both a has_one and a has_many reciprocal"
                )))
            }
            (Some(_), None) if field.index => {
                return Err(syntax(format!(
                    "One-to-one relation '{collection}.{name}' is already unique and cannot be a multi index"
                )))
            }
            (Some(_), None) => Some(IndexKind::Unique),
            (None, Some(_)) if field.unique => {
                return Err(syntax(format!(
                    "One-to-many relation '{collection}.{name}' cannot be unique"
                )))
            }
            (None, Some(_)) => Some(IndexKind::Multi),
            (None, None) if field.unique || field.index => {
                return Err(syntax(format!(
                    "Relation '{collection}.{name}' needs a reciprocal name to be indexed"
                )))
            }
            (None, None) => None,
        };

        let slot = self.next_slot(position);
        let property = self.push_property(
            position,
            PropertyDescriptor {
                name: name.to_string(),
                field_type: None,
                required: field.required,
                default: None,
                enum_values: None,
                accessor: Accessor::HasOne { slot, foreign },
                indexes: Vec::new(),
                unique_index: None,
            },
        );

        let Some(kind) = kind else {
            return Ok(());
        };
        let index = self.add_own_index(position, property, kind)?;
        let (reciprocal, kind) = match (&relation.has_one, &relation.has_many) {
            (Some(reciprocal), _) => (reciprocal, ReciprocalKind::OneToOne { index }),
            (_, Some(reciprocal)) => (reciprocal, ReciprocalKind::ManyToOne { index }),
            (None, None) => return Ok(()),
        };
        self.pending.push(PendingReciprocal {
            target: foreign,
            name: reciprocal.clone(),
            source: position,
            property,
            kind,
        });
        Ok(())
    }

    fn add_has_many(
        &mut self,
        position: usize,
        name: &str,
        field: &FieldDefinition,
        relation: &RelationDefinition,
    ) -> Result<()> {
        let collection = self.collections[position].name.clone();
        let foreign = self.relation_target(&collection, name, field, relation)?;

        if relation.has_one.is_some() {
            return Err(syntax(format!(
                "Relation '{collection}.{name}': a has_many relation cannot have a has_one reciprocal; declare has_one on the other side"
            )));
        }
        if field.unique || field.index {
            return Err(syntax(format!(
                "Relation '{collection}.{name}': id sets cannot be indexed"
            )));
        }

        let slot = self.next_slot(position);
        let property = self.push_property(
            position,
            PropertyDescriptor {
                name: name.to_string(),
                field_type: None,
                required: field.required,
                default: None,
                enum_values: None,
                accessor: Accessor::HasMany {
                    slot,
                    foreign,
                    reciprocal: None,
                },
                indexes: Vec::new(),
                unique_index: None,
            },
        );

        if let Some(reciprocal) = &relation.has_many {
            self.pending.push(PendingReciprocal {
                target: foreign,
                name: reciprocal.clone(),
                source: position,
                property,
                kind: ReciprocalKind::ManyToMany,
            });
        }
        Ok(())
    }

    fn relation_target(
        &self,
        collection: &str,
        name: &str,
        field: &FieldDefinition,
        relation: &RelationDefinition,
    ) -> Result<usize> {
        if field.field_type.is_some() {
            return Err(syntax(format!(
                "Relation '{collection}.{name}' cannot also declare a type"
            )));
        }
        if field.default.is_some() || field.enum_values.is_some() {
            return Err(syntax(format!(
                "Relation '{collection}.{name}' cannot declare a default or enum"
            )));
        }
        self.collections.get_index_of(&relation.collection).ok_or_else(|| {
            syntax(format!(
                "Relation '{collection}.{name}' targets unknown collection '{}'",
                relation.collection
            ))
        })
    }

    fn install_reciprocal(&mut self, pending: PendingReciprocal) -> Result<()> {
        let source_name = self.collections[pending.source].name.clone();
        let source_property = self.collections[pending.source].properties[pending.property].name.clone();
        let target_name = self.collections[pending.target].name.clone();
        self.check_property_name(&target_name, &pending.name)?;

        if self.collections[pending.target].properties.contains_key(&pending.name) {
            return Err(syntax(format!(
                "Reciprocal '{target_name}.{}' of '{source_name}.{source_property}' is already taken",
                pending.name
            )));
        }

        let accessor = match pending.kind {
            ReciprocalKind::ManyToOne { index } => Accessor::ManyToOne {
                foreign: pending.source,
                property: pending.property,
                index,
            },
            ReciprocalKind::OneToOne { index } => Accessor::OneToOne {
                foreign: pending.source,
                property: pending.property,
                index,
            },
            ReciprocalKind::ManyToMany => Accessor::HasMany {
                slot: self.next_slot(pending.target),
                foreign: pending.source,
                reciprocal: Some(pending.property),
            },
        };
        let is_many_to_many = matches!(accessor, Accessor::HasMany { .. });

        let installed = self.push_property(
            pending.target,
            PropertyDescriptor {
                name: pending.name,
                field_type: None,
                required: false,
                default: None,
                enum_values: None,
                accessor,
                indexes: Vec::new(),
                unique_index: None,
            },
        );

        if is_many_to_many {
            let source = &mut self.collections[pending.source].properties[pending.property];
            if let Accessor::HasMany { reciprocal, .. } = &mut source.accessor {
                *reciprocal = Some(installed);
            }
        }
        Ok(())
    }

    fn add_composites(&mut self, position: usize, definition: &CollectionDefinition) -> Result<()> {
        let collection = self.collections[position].name.clone();
        for (name, composite) in &definition.indexes {
            if !self.names.is_match(name) {
                return Err(syntax(format!("Illegal index name '{collection}.{name}'")));
            }
            if self.collections[position].indexes.contains_key(name) {
                return Err(syntax(format!(
                    "Index name '{collection}.{name}' collides with another index"
                )));
            }
            if composite.components.len() < 2 {
                return Err(syntax(format!(
                    "Composite index '{collection}.{name}' needs at least two components"
                )));
            }

            let mut members = Vec::with_capacity(composite.components.len());
            let mut slots = Vec::with_capacity(composite.components.len());
            for component in &composite.components {
                let descriptor = &self.collections[position];
                let Some((member, property)) = descriptor.property(component) else {
                    return Err(syntax(format!(
                        "Composite index '{collection}.{name}' names unknown property '{component}'"
                    )));
                };
                let slot = match property.accessor {
                    Accessor::Scalar { slot } if property.field_type.map_or(false, FieldType::is_indexable) => slot,
                    Accessor::HasOne { slot, .. } => slot,
                    _ => {
                        return Err(syntax(format!(
                            "Composite index '{collection}.{name}': property '{component}' cannot be indexed"
                        )))
                    }
                };
                if members.contains(&member) {
                    return Err(syntax(format!(
                        "Composite index '{collection}.{name}' repeats property '{component}'"
                    )));
                }
                members.push(member);
                slots.push(slot);
            }

            let kind = if composite.unique {
                IndexKind::CompositeUnique
            } else {
                IndexKind::CompositeMulti
            };
            let descriptor = &mut self.collections[position];
            let (index, _) = descriptor.indexes.insert_full(
                name.clone(),
                IndexDescriptor {
                    name: name.clone(),
                    kind,
                    components: slots,
                },
            );
            for member in members {
                descriptor.properties[member].indexes.push(index);
            }
        }
        Ok(())
    }

    fn check_property_name(&self, collection: &str, name: &str) -> Result<()> {
        if !self.names.is_match(name) {
            return Err(syntax(format!("Illegal property name '{collection}.{name}'")));
        }
        if name == "id" {
            return Err(syntax(format!("Property name '{collection}.id' is reserved")));
        }
        Ok(())
    }

    fn next_slot(&mut self, position: usize) -> usize {
        let descriptor = &mut self.collections[position];
        descriptor.slots += 1;
        descriptor.slots - 1
    }

    fn push_property(&mut self, position: usize, property: PropertyDescriptor) -> usize {
        let properties = &mut self.collections[position].properties;
        let (index, _) = properties.insert_full(property.name.clone(), property);
        index
    }

    /// Install the single-field index named after `property`.
    fn add_own_index(&mut self, position: usize, property: usize, kind: IndexKind) -> Result<usize> {
        let descriptor = &mut self.collections[position];
        let (name, slot) = {
            let property = &descriptor.properties[property];
            let slot = property.accessor.slot().ok_or_else(|| {
                syntax(format!("Property '{}.{}' has no storage to index", descriptor.name, property.name))
            })?;
            (property.name.clone(), slot)
        };

        let (index, _) = descriptor.indexes.insert_full(
            name.clone(),
            IndexDescriptor {
                name,
                kind,
                components: vec![slot],
            },
        );
        let property = &mut descriptor.properties[property];
        property.indexes.push(index);
        if kind == IndexKind::Unique {
            property.unique_index = Some(index);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use pretty_assertions::assert_eq;

    fn compile(yaml: &str) -> Result<CompiledSchema> {
        CompiledSchema::compile(&parse_schema_str(yaml)?)
    }

    fn syntax_error(yaml: &str) -> String {
        match compile(yaml) {
            Err(LinkbaseError::SchemaSyntax(message)) => message,
            other => panic!("expected a schema syntax error, got {other:?}"),
        }
    }

    const SHOP: &str = r#"
collections:
  customers:
    fields:
      email: { type: string, unique: true }
      tier: { type: string, index: true, enum: [free, paid] }
      account:
        has_one: { collection: accounts, has_one: owner }
  accounts:
    fields:
      balance: { type: number, default: 0 }
  orders:
    fields:
      number: { type: number }
      placed: { type: date }
      customer:
        has_one: { collection: customers, has_many: orders }
      products:
        has_many: { collection: products, has_many: orders }
    indexes:
      by_customer_number: { components: [customer, number], unique: true }
  products:
    fields:
      sku: { type: string }
"#;

    #[test]
    fn test_compile_slots_and_accessors() {
        let schema = compile(SHOP).unwrap();
        let customers = schema.collection(schema.collection_index("customers").unwrap());

        let (_, email) = customers.property("email").unwrap();
        assert_eq!(email.accessor, Accessor::Scalar { slot: 0 });
        assert_eq!(email.unique_index, Some(0));

        let (_, account) = customers.property("account").unwrap();
        let accounts = schema.collection_index("accounts").unwrap();
        assert_eq!(account.accessor, Accessor::HasOne { slot: 2, foreign: accounts });
        assert_eq!(customers.slots, 3);

        let index_names: Vec<&String> = customers.indexes.keys().collect();
        assert_eq!(index_names, ["email", "tier", "account"]);
        assert_eq!(customers.indexes["tier"].kind, IndexKind::Multi);
        assert_eq!(customers.indexes["account"].kind, IndexKind::Unique);
    }

    #[test]
    fn test_compile_installs_reciprocals() {
        let schema = compile(SHOP).unwrap();
        let customers_at = schema.collection_index("customers").unwrap();
        let orders_at = schema.collection_index("orders").unwrap();
        let customers = schema.collection(customers_at);
        let orders = schema.collection(orders_at);

        let (_, reciprocal) = customers.property("orders").unwrap();
        let (customer_at, _) = orders.property("customer").unwrap();
        assert_eq!(
            reciprocal.accessor,
            Accessor::ManyToOne {
                foreign: orders_at,
                property: customer_at,
                index: 0,
            }
        );
        assert!(!reciprocal.accessor.is_stored());

        let accounts = schema.collection(schema.collection_index("accounts").unwrap());
        assert!(matches!(accounts.property("owner").unwrap().1.accessor, Accessor::OneToOne { .. }));

        let products_at = schema.collection_index("products").unwrap();
        let products = schema.collection(products_at);
        let (orders_property, installed) = products.property("orders").unwrap();
        let (products_property, declared) = orders.property("products").unwrap();
        assert_eq!(
            installed.accessor,
            Accessor::HasMany {
                slot: 1,
                foreign: orders_at,
                reciprocal: Some(products_property),
            }
        );
        assert_eq!(
            declared.accessor,
            Accessor::HasMany {
                slot: 3,
                foreign: products_at,
                reciprocal: Some(orders_property),
            }
        );
    }

    #[test]
    fn test_compile_composite_membership() {
        let schema = compile(SHOP).unwrap();
        let orders = schema.collection(schema.collection_index("orders").unwrap());
        let composite = &orders.indexes["by_customer_number"];
        assert_eq!(composite.kind, IndexKind::CompositeUnique);
        assert_eq!(composite.components, vec![2, 0]);

        let (_, number) = orders.property("number").unwrap();
        let (_, customer) = orders.property("customer").unwrap();
        assert_eq!(number.indexes, vec![1]);
        assert_eq!(customer.indexes, vec![0, 1]);
        assert_eq!(number.unique_index, None);
    }

    #[test]
    fn test_compile_defaults_are_coerced() {
        let schema = compile(SHOP).unwrap();
        let accounts = schema.collection(schema.collection_index("accounts").unwrap());
        assert_eq!(accounts.property("balance").unwrap().1.default, Some(Value::Number(0.0)));
    }

    #[test]
    fn test_creation_order_puts_required_targets_first() {
        let schema = compile(
            r#"
collections:
  posts:
    fields:
      author: { has_one: { collection: users, has_many: posts }, required: true }
  users:
    fields:
      name: { type: string }
"#,
        )
        .unwrap();
        assert_eq!(schema.creation_order(), vec![1, 0]);
    }

    #[test]
    fn test_illegal_names() {
        assert!(syntax_error("collections:\n  _hidden:\n    fields: {}\n").contains("must not start"));
        assert!(syntax_error("collections:\n  my-things:\n    fields: {}\n").contains("Illegal collection"));
        assert!(syntax_error("collections:\n  t:\n    fields:\n      id: { type: string }\n").contains("reserved"));
        assert!(syntax_error("collections:\n  t:\n    fields:\n      2x: { type: string }\n").contains("Illegal property"));
    }

    #[test]
    fn test_conflicting_relations() {
        let both = "collections:\n  a:\n    fields:\n      b: { has_one: { collection: a }, has_many: { collection: a } }\n";
        assert!(syntax_error(both).contains("both has_one and has_many"));

        let typed = "collections:\n  a:\n    fields:\n      b: { type: string, has_one: { collection: a } }\n";
        assert!(syntax_error(typed).contains("cannot also declare a type"));

        let unknown = "collections:\n  a:\n    fields:\n      b: { has_one: { collection: nowhere } }\n";
        assert!(syntax_error(unknown).contains("unknown collection"));

        let taken = "collections:\n  a:\n    fields:\n      b: { has_one: { collection: c, has_many: x } }\n  c:\n    fields:\n      x: { type: number }\n";
        assert!(syntax_error(taken).contains("already taken"));

        let unique_many = "collections:\n  a:\n    fields:\n      b: { unique: true, has_one: { collection: c, has_many: x } }\n  c:\n    fields: {}\n";
        assert!(syntax_error(unique_many).contains("cannot be unique"));

        let plain_indexed = "collections:\n  a:\n    fields:\n      b: { index: true, has_one: { collection: a } }\n";
        assert!(syntax_error(plain_indexed).contains("reciprocal name"));
    }

    #[test]
    fn test_unsupported_indexes() {
        assert!(syntax_error("collections:\n  t:\n    fields:\n      d: { type: date, index: true }\n").contains("cannot be indexed"));
        assert!(syntax_error("collections:\n  t:\n    fields:\n      o: { unique: true }\n").contains("cannot be indexed"));
        assert!(syntax_error("collections:\n  t:\n    fields:\n      s: { type: string, unique: true, index: true }\n").contains("both unique and index"));
        assert!(syntax_error("collections:\n  t:\n    fields:\n      r: { index: true, has_many: { collection: t } }\n").contains("id sets"));
    }

    #[test]
    fn test_malformed_composites() {
        let short = "collections:\n  t:\n    fields:\n      a: { type: string }\n    indexes:\n      pair: { components: [a] }\n";
        assert!(syntax_error(short).contains("at least two"));

        let unknown = "collections:\n  t:\n    fields:\n      a: { type: string }\n    indexes:\n      pair: { components: [a, b] }\n";
        assert!(syntax_error(unknown).contains("unknown property"));

        let dated = "collections:\n  t:\n    fields:\n      a: { type: string }\n      d: { type: date }\n    indexes:\n      pair: { components: [a, d] }\n";
        assert!(syntax_error(dated).contains("cannot be indexed"));

        let collides = "collections:\n  t:\n    fields:\n      a: { type: string, index: true }\n      b: { type: string }\n    indexes:\n      a: { components: [a, b] }\n";
        assert!(syntax_error(collides).contains("collides"));
    }

    #[test]
    fn test_invalid_default() {
        let message = syntax_error("collections:\n  t:\n    fields:\n      n: { type: number, default: seven }\n");
        assert!(message.contains("Invalid default"));
        let message = syntax_error("collections:\n  t:\n    fields:\n      s: { type: string, enum: [a], default: b }\n");
        assert!(message.contains("Invalid default"));
    }
}
