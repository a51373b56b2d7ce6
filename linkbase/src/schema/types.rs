use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Top-level schema definition parsed from a schema YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub collections: IndexMap<String, CollectionDefinition>,
}

impl SchemaDefinition {
    pub fn get_collection(&self, name: &str) -> Option<&CollectionDefinition> {
        self.collections.get(name)
    }
}

/// Definition of a single collection: its fields in declaration order and
/// any composite indexes over them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionDefinition {
    #[serde(default)]
    pub fields: IndexMap<String, FieldDefinition>,
    #[serde(default)]
    pub indexes: IndexMap<String, CompositeIndexDefinition>,
}

/// Definition of a single field.
///
/// A plain field carries a `type`; a relation field carries exactly one of
/// `has_one` / `has_many` and no `type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type", default)]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, alias = "hasOne")]
    pub has_one: Option<RelationDefinition>,
    #[serde(default, alias = "hasMany")]
    pub has_many: Option<RelationDefinition>,
}

impl FieldDefinition {
    pub fn is_relation(&self) -> bool {
        self.has_one.is_some() || self.has_many.is_some()
    }
}

/// Target of a relation field. The inner `has_one` / `has_many` names the
/// reciprocal property installed on the foreign collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub collection: String,
    #[serde(default, alias = "hasOne")]
    pub has_one: Option<String>,
    #[serde(default, alias = "hasMany")]
    pub has_many: Option<String>,
}

/// A named index over two or more fields of one collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeIndexDefinition {
    pub components: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Set,
    Object,
    Any,
}

impl FieldType {
    /// Whether values of this type can key an index.
    pub fn is_indexable(self) -> bool {
        matches!(self, FieldType::String | FieldType::Number | FieldType::Boolean)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Array => "array",
            FieldType::Set => "set",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}
