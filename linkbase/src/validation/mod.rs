use crate::error::{LinkbaseError, Result};
use crate::id::Id;
use crate::schema::{Accessor, CollectionDescriptor, FieldType};
use crate::value::Value;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as Json;

/// Result of validating a whole item payload
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn collected errors into a single `Validation` error.
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        Err(LinkbaseError::Validation(format!(
            "Item validation failed:\n  - {}",
            self.errors.join("\n  - ")
        )))
    }
}

/// Check an item payload against its collection before any field is written:
/// it must be an object, name only known properties, carry every required
/// field that has no default, and hold values of the declared types.
pub fn validate_payload(collection: &CollectionDescriptor, data: &Json) -> ValidationResult {
    let mut result = ValidationResult::default();

    let Some(map) = data.as_object() else {
        result.errors.push(format!(
            "Payload for '{}' must be an object, got {}",
            collection.name,
            type_name(data)
        ));
        return result;
    };

    for key in map.keys() {
        if key != "id" && !collection.properties.contains_key(key) {
            result.errors.push(format!("Unknown property '{}.{key}'", collection.name));
        }
    }

    for property in collection.properties.values() {
        let value = map.get(&property.name).filter(|v| !v.is_null());
        let Some(value) = value else {
            if property.required && property.default.is_none() {
                result
                    .errors
                    .push(format!("Required field '{}' is missing", property.name));
            }
            continue;
        };

        let checked = match property.accessor {
            Accessor::Scalar { .. } => coerce_value(
                &collection.name,
                &property.name,
                property.field_type.unwrap_or(FieldType::Any),
                property.enum_values.as_deref(),
                value,
            )
            .map(|_| ()),
            Accessor::HasOne { .. } | Accessor::OneToOne { .. } => {
                coerce_ref(&collection.name, &property.name, value).map(|_| ())
            }
            Accessor::HasMany { .. } | Accessor::ManyToOne { .. } => {
                coerce_refs(&collection.name, &property.name, value).map(|_| ())
            }
        };
        if let Err(LinkbaseError::Validation(message)) = checked {
            result.errors.push(message);
        }
    }

    result
}

/// Coerce a JSON value into the stored form of a field of `field_type`.
/// Null is not a value; callers treat it as clearing the field.
pub fn coerce_value(
    collection: &str,
    property: &str,
    field_type: FieldType,
    enum_values: Option<&[String]>,
    raw: &Json,
) -> Result<Value> {
    let mismatch = || {
        LinkbaseError::Validation(format!(
            "Field '{collection}.{property}' expected {}, got {}",
            field_type.name(),
            type_name(raw)
        ))
    };

    match field_type {
        FieldType::String => {
            let s = raw.as_str().ok_or_else(mismatch)?;
            if let Some(allowed) = enum_values {
                if !allowed.iter().any(|v| v == s) {
                    return Err(LinkbaseError::Validation(format!(
                        "Field '{collection}.{property}' value '{s}' is not in enum: {allowed:?}"
                    )));
                }
            }
            Ok(Value::String(s.to_string()))
        }
        FieldType::Number => raw.as_f64().map(Value::Number).ok_or_else(mismatch),
        FieldType::Boolean => raw.as_bool().map(Value::Bool).ok_or_else(mismatch),
        FieldType::Date => parse_date(raw).map(Value::Date).ok_or_else(mismatch),
        FieldType::Array => match raw {
            Json::Array(items) => Ok(Value::Array(items.clone())),
            _ => Err(mismatch()),
        },
        FieldType::Set => match raw {
            Json::Array(items) => {
                let mut unique: Vec<Json> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.contains(item) {
                        unique.push(item.clone());
                    }
                }
                Ok(Value::Set(unique))
            }
            _ => Err(mismatch()),
        },
        FieldType::Object => match raw {
            Json::Object(_) => Ok(Value::Json(raw.clone())),
            _ => Err(mismatch()),
        },
        FieldType::Any => match raw {
            Json::Null => Err(mismatch()),
            _ => Ok(Value::Json(raw.clone())),
        },
    }
}

/// Coerce a reference: an id string, or an exported item carrying an `id`.
pub fn coerce_ref(collection: &str, property: &str, raw: &Json) -> Result<Id> {
    let candidate = match raw {
        Json::String(s) => Some(s.as_str()),
        Json::Object(map) => map.get("id").and_then(Json::as_str),
        _ => None,
    };
    candidate
        .and_then(|s| Id::parse(s).ok())
        .ok_or_else(|| {
            LinkbaseError::Validation(format!(
                "Field '{collection}.{property}' expected an item id, got {}",
                describe(raw)
            ))
        })
}

/// Coerce a list of references, dropping repeats but keeping first-seen order.
pub fn coerce_refs(collection: &str, property: &str, raw: &Json) -> Result<Vec<Id>> {
    let Json::Array(items) = raw else {
        return Err(LinkbaseError::Validation(format!(
            "Field '{collection}.{property}' expected a list of item ids, got {}",
            type_name(raw)
        )));
    };
    let mut ids: Vec<Id> = Vec::with_capacity(items.len());
    for item in items {
        let id = coerce_ref(collection, property, item)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Accepts RFC 3339 timestamps, plain `YYYY-MM-DD` dates (midnight UTC) and
/// milliseconds since the epoch. Sub-millisecond precision is dropped.
pub fn parse_date(raw: &Json) -> Option<DateTime<Utc>> {
    let parsed = match raw {
        Json::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc())
            })?,
        Json::Number(n) => DateTime::<Utc>::from_timestamp_millis(n.as_f64()? as i64)?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp_millis(parsed.timestamp_millis())
}

pub fn type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn describe(value: &Json) -> String {
    match value {
        Json::String(s) => format!("'{s}'"),
        other => type_name(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, CompiledSchema};
    use serde_json::json;

    fn test_schema() -> CompiledSchema {
        CompiledSchema::compile(
            &parse_schema_str(
                r#"
collections:
  users:
    fields:
      name: { type: string, required: true }
      email: { type: string, required: true }
      role: { type: string, enum: [admin, member, guest], default: member }
      address: { type: object }
  posts:
    fields:
      title: { type: string, required: true }
      author: { has_one: { collection: users, has_many: posts } }
      published: { type: date }
      tags: { type: set }
"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_user() {
        let schema = test_schema();
        let users = schema.collection(0);
        let result = validate_payload(users, &json!({ "name": "Alice", "email": "alice@test.com", "role": "admin" }));
        assert!(result.is_ok(), "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_missing_required_field() {
        let schema = test_schema();
        let result = validate_payload(schema.collection(0), &json!({ "name": "Alice" }));
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("email")));
    }

    #[test]
    fn test_invalid_enum_value() {
        let schema = test_schema();
        let result = validate_payload(
            schema.collection(0),
            &json!({ "name": "Alice", "email": "a@test.com", "role": "superadmin" }),
        );
        assert!(result.errors.iter().any(|e| e.contains("superadmin")));
    }

    #[test]
    fn test_type_mismatch() {
        let schema = test_schema();
        let result = validate_payload(schema.collection(0), &json!({ "name": 42, "email": "a@test.com" }));
        assert!(result.errors.iter().any(|e| e.contains("users.name")));
    }

    #[test]
    fn test_unknown_property_rejected() {
        let schema = test_schema();
        let result = validate_payload(
            schema.collection(0),
            &json!({ "id": "5f2b6e1c9a3d4b0012ab34cd", "name": "A", "email": "e", "extra_field": 1 }),
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("extra_field"));
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_reciprocal_view_is_checked_as_id_list() {
        let schema = test_schema();
        let result = validate_payload(schema.collection(0), &json!({ "name": "A", "email": "e", "posts": "nope" }));
        assert!(result.errors.iter().any(|e| e.contains("users.posts")));
    }

    #[test]
    fn test_coerce_dates() {
        let expected = DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(parse_date(&json!("2024-03-01")), Some(expected));
        assert_eq!(parse_date(&json!("2024-03-01T01:00:00+01:00")), Some(expected));
        assert_eq!(parse_date(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(parse_date(&json!(true)), None);

        let precise = parse_date(&json!("2024-03-01T00:00:00.123456Z")).unwrap();
        assert_eq!(precise.timestamp_subsec_micros(), 123_000);
    }

    #[test]
    fn test_coerce_set_dedupes() {
        let value = coerce_value("t", "tags", FieldType::Set, None, &json!(["a", "b", "a"])).unwrap();
        assert_eq!(value, Value::Set(vec![json!("a"), json!("b")]));
    }

    #[test]
    fn test_coerce_refs() {
        let a = "5f2b6e1c9a3d4b0012ab34cd";
        let b = "5f2b6e1c9a3d4b0012ab34ce";
        let ids = coerce_refs("t", "r", &json!([a, { "id": b }, a])).unwrap();
        assert_eq!(ids, vec![Id::parse(a).unwrap(), Id::parse(b).unwrap()]);

        let err = coerce_ref("t", "r", &json!("bogus")).unwrap_err();
        assert!(err.to_string().contains("'bogus'"));
        assert!(coerce_refs("t", "r", &json!(a)).is_err());
    }

    #[test]
    fn test_any_rejects_null() {
        assert!(coerce_value("t", "x", FieldType::Any, None, &Json::Null).is_err());
        assert_eq!(
            coerce_value("t", "x", FieldType::Any, None, &json!([1])).unwrap(),
            Value::Json(json!([1]))
        );
    }
}
