use crate::error::{LinkbaseError, Result};
use crate::id::Id;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as Json};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A coerced field value as stored in an item's write slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    /// UTC instant at millisecond precision.
    Date(DateTime<Utc>),
    Array(Vec<Json>),
    /// Insertion-ordered, duplicate-free.
    Set(Vec<Json>),
    /// Objects and `any`-typed values.
    Json(Json),
    /// A single relation target.
    Ref(Id),
    /// An ordered set of relation targets.
    Refs(Vec<Id>),
}

impl Value {
    /// The canonical key this value is indexed under, if it is indexable.
    pub fn index_key(&self) -> Option<IndexKey> {
        match self {
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => Some(IndexKey::Number(NumberKey(*n))),
            Value::String(s) => Some(IndexKey::String(s.clone())),
            Value::Ref(id) => Some(IndexKey::from(id)),
            _ => None,
        }
    }

    /// Render for export: dates as RFC 3339, references as id strings.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Array(items) | Value::Set(items) => Json::Array(items.clone()),
            Value::Json(v) => v.clone(),
            Value::Ref(id) => Json::String(id.to_string()),
            Value::Refs(ids) => Json::Array(ids.iter().map(|id| Json::String(id.to_string())).collect()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Json(_) => "object",
            Value::Ref(_) => "reference",
            Value::Refs(_) => "reference set",
        }
    }

    pub fn as_ref_id(&self) -> Option<&Id> {
        match self {
            Value::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// Relation targets held by this value; empty for anything but `Ref`/`Refs`.
    pub fn ref_ids(&self) -> &[Id] {
        match self {
            Value::Ref(id) => std::slice::from_ref(id),
            Value::Refs(ids) => ids,
            _ => &[],
        }
    }
}

/// Integral numbers render as JSON integers so that `3` survives an export.
pub fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

/// A float usable as a map key: `-0` equals `0` and every NaN equals every NaN.
#[derive(Debug, Clone, Copy)]
pub struct NumberKey(pub f64);

impl NumberKey {
    fn canonical_bits(self) -> u64 {
        if self.0 == 0.0 {
            0
        } else if self.0.is_nan() {
            f64::NAN.to_bits()
        } else {
            self.0.to_bits()
        }
    }
}

impl PartialEq for NumberKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_bits() == other.canonical_bits()
    }
}

impl Eq for NumberKey {}

impl Hash for NumberKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_bits().hash(state);
    }
}

/// Canonical scalar used as an index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Bool(bool),
    Number(NumberKey),
    String(String),
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Bool(b) => write!(f, "{b}"),
            IndexKey::Number(n) => write!(f, "{}", n.0),
            IndexKey::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for IndexKey {
    fn from(b: bool) -> Self {
        IndexKey::Bool(b)
    }
}

impl From<f64> for IndexKey {
    fn from(n: f64) -> Self {
        IndexKey::Number(NumberKey(n))
    }
}

impl From<i64> for IndexKey {
    fn from(n: i64) -> Self {
        IndexKey::Number(NumberKey(n as f64))
    }
}

impl From<i32> for IndexKey {
    fn from(n: i32) -> Self {
        IndexKey::Number(NumberKey(f64::from(n)))
    }
}

impl From<&str> for IndexKey {
    fn from(s: &str) -> Self {
        IndexKey::String(s.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(s: String) -> Self {
        IndexKey::String(s)
    }
}

impl From<&Id> for IndexKey {
    fn from(id: &Id) -> Self {
        IndexKey::String(id.to_string())
    }
}

/// Render a composite key for error messages; undefined components show as `_`.
pub fn describe_key(components: &[Option<IndexKey>]) -> String {
    let parts: Vec<String> = components
        .iter()
        .map(|c| c.as_ref().map_or_else(|| "_".to_string(), IndexKey::to_string))
        .collect();
    format!("({})", parts.join(", "))
}

/// A dotted property path split once into segments. The first segment names
/// a schema property; any further segments descend into an object value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(LinkbaseError::Validation(format!(
                "Invalid property path '{path}'"
            )));
        }
        Ok(PropertyPath { segments })
    }

    pub fn property(&self) -> &str {
        &self.segments[0]
    }

    /// Segments below the property itself.
    pub fn nested(&self) -> &[String] {
        &self.segments[1..]
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Read the value at `path` inside `root`.
pub fn get_in<'a>(root: &'a Json, path: &[String]) -> Option<&'a Json> {
    let mut cursor = root;
    for segment in path {
        cursor = cursor.as_object()?.get(segment)?;
    }
    Some(cursor)
}

/// Write (or with `None`, remove) the value at `path` inside `root`, creating
/// intermediate objects as needed.
pub fn set_in(root: &mut Json, path: &[String], value: Option<Json>) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        if let Some(value) = value {
            *root = value;
        }
        return Ok(());
    };

    let mut cursor = root;
    for segment in parents {
        let Json::Object(map) = cursor else {
            return Err(LinkbaseError::Validation(format!(
                "Cannot descend into non-object value at '{segment}'"
            )));
        };
        cursor = map
            .entry(segment.clone())
            .or_insert_with(|| Json::Object(Map::new()));
    }

    let Json::Object(map) = cursor else {
        return Err(LinkbaseError::Validation(format!(
            "Cannot descend into non-object value at '{last}'"
        )));
    };
    match value {
        Some(value) => {
            map.insert(last.clone(), value);
        }
        None => {
            map.remove(last);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_number_key_normalisation() {
        assert_eq!(IndexKey::from(0.0), IndexKey::from(-0.0));
        assert_eq!(IndexKey::from(f64::NAN), IndexKey::from(-f64::NAN));
        assert_eq!(IndexKey::from(3_i64), IndexKey::from(3.0));
        assert_ne!(IndexKey::from(1.0), IndexKey::from("1"));

        let keys: HashSet<IndexKey> = [0.0, -0.0, 1.5].into_iter().map(IndexKey::from).collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_index_key_of_values() {
        let id = Id::parse("5f2b6e1c9a3d4b0012ab34cd").unwrap();
        assert_eq!(
            Value::Ref(id.clone()).index_key(),
            Some(IndexKey::String(id.to_string()))
        );
        assert_eq!(Value::Bool(true).index_key(), Some(IndexKey::Bool(true)));
        assert_eq!(Value::Array(vec![json!(1)]).index_key(), None);
        assert_eq!(Value::Date(Utc::now()).index_key(), None);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(Value::Number(3.0).to_json(), json!(3));
        assert_eq!(Value::Number(2.5).to_json(), json!(2.5));
        let date = DateTime::parse_from_rfc3339("2024-03-01T10:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Value::Date(date).to_json(), json!("2024-03-01T10:00:00.250Z"));
        assert_eq!(Value::Set(vec![json!("a")]).to_json(), json!(["a"]));
    }

    #[test]
    fn test_describe_key() {
        let key = vec![Some(IndexKey::from(1_i64)), None, Some(IndexKey::from("x"))];
        assert_eq!(describe_key(&key), "(1, _, \"x\")");
    }

    #[test]
    fn test_property_path() {
        let path = PropertyPath::parse("address.city").unwrap();
        assert_eq!(path.property(), "address");
        assert_eq!(path.nested(), ["city".to_string()]);
        assert!(path.is_nested());
        assert!(!PropertyPath::parse("name").unwrap().is_nested());
        assert!(PropertyPath::parse("a..b").is_err());
        assert!(PropertyPath::parse("").is_err());
    }

    #[test]
    fn test_get_and_set_in() {
        let mut root = json!({ "address": { "city": "Oslo" } });
        let city = vec!["address".to_string(), "city".to_string()];
        assert_eq!(get_in(&root, &city), Some(&json!("Oslo")));

        let zip = vec!["address".to_string(), "geo".to_string(), "zip".to_string()];
        set_in(&mut root, &zip, Some(json!("0150"))).unwrap();
        assert_eq!(root["address"]["geo"]["zip"], json!("0150"));

        set_in(&mut root, &city, None).unwrap();
        assert_eq!(get_in(&root, &city), None);

        let through_string = vec!["address".to_string(), "geo".to_string(), "zip".to_string(), "x".to_string()];
        assert!(set_in(&mut root, &through_string, Some(json!(1))).is_err());
    }
}
