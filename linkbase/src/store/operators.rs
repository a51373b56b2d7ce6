//! `+`/`-` deltas and the update-log operator dispatch.

use super::{Database, WriteMode};
use crate::error::{LinkbaseError, Result};
use crate::id::Id;
use crate::schema::{Accessor, FieldType};
use crate::update_log::Operator;
use crate::validation::{coerce_ref, parse_date, type_name};
use crate::value::{get_in, number_to_json, set_in, PropertyPath};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delta {
    Add,
    Subtract,
}

impl Delta {
    fn symbol(self) -> char {
        match self {
            Delta::Add => '+',
            Delta::Subtract => '-',
        }
    }
}

/// What a delta does to a value, picked from the declared type or, for
/// untyped values, from the value itself.
#[derive(Debug, Clone, Copy)]
enum DeltaKind {
    Number,
    Date,
    String,
    Array,
    Set,
}

impl Database {
    pub(crate) fn apply_delta(
        &mut self,
        collection: usize,
        id: &Id,
        path: &PropertyPath,
        payload: &Json,
        delta: Delta,
    ) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let descriptor = schema.collection(collection);
        let (position, property) = descriptor.require_property(path.property())?;
        let label = format!("{}.{path}", descriptor.name);

        match property.accessor {
            Accessor::HasMany { .. } | Accessor::ManyToOne { .. } => {
                if path.is_nested() {
                    return Err(LinkbaseError::Validation(format!("Cannot descend into '{label}'")));
                }
                let target = coerce_ref(&descriptor.name, &property.name, payload)?;
                let mut ids = self.read_ids(collection, id, position);
                match delta {
                    Delta::Add if ids.contains(&target) => return Ok(()),
                    Delta::Add => ids.push(target),
                    Delta::Subtract if !ids.contains(&target) => return Ok(()),
                    Delta::Subtract => ids.retain(|linked| linked != &target),
                }
                self.write_ids(collection, id, position, ids, WriteMode::Normal)
            }
            Accessor::HasOne { .. } | Accessor::OneToOne { .. } => Err(LinkbaseError::Validation(format!(
                "Operator '{}' does not apply to the single reference '{label}'",
                delta.symbol()
            ))),
            Accessor::Scalar { .. } if path.is_nested() => {
                let mut root = self.object_root(descriptor, collection, id, position)?;
                let current = get_in(&root, path.nested()).cloned();
                let next = combine(&label, None, current.as_ref(), payload, delta)?;
                if next == current {
                    return Ok(());
                }
                set_in(&mut root, path.nested(), next)?;
                self.write_property(collection, id, position, Some(&root), WriteMode::Normal)
            }
            Accessor::Scalar { .. } => {
                let current = self.stored_value(collection, id, position)?.map(|value| value.to_json());
                let next = combine(&label, property.field_type, current.as_ref(), payload, delta)?;
                if next == current {
                    return Ok(());
                }
                self.write_property(collection, id, position, next.as_ref(), WriteMode::Normal)
            }
        }
    }

    /// Execute one update-log operation. Operations on items that no longer
    /// exist are no-ops, so a log replays cleanly after a later deletion.
    pub fn apply_operator(
        &mut self,
        collection: &str,
        operator: Operator,
        id: Option<&Id>,
        path: Option<&str>,
        payload: Option<&Json>,
    ) -> Result<()> {
        let position = self.schema.require_collection(collection)?;
        let payload = payload.filter(|payload| !payload.is_null());

        match operator {
            Operator::Assign => match (id, path) {
                (Some(id), None) => match payload {
                    Some(data) => self.replace_item(position, id, data),
                    None => self.delete_item(position, id).map(|_| ()),
                },
                (Some(id), Some(path)) => {
                    if !self.contains(position, id) {
                        return Ok(());
                    }
                    let path = PropertyPath::parse(path)?;
                    self.write_path(position, id, &path, payload)
                }
                (None, None) => match payload {
                    Some(data) => self.insert(collection, data).map(|_| ()),
                    None => Err(LinkbaseError::UpdateLog(
                        "'=' without an id needs an item payload".to_string(),
                    )),
                },
                (None, Some(path)) => Err(LinkbaseError::UpdateLog(format!(
                    "'=' on '{collection}.{path}' needs an item id"
                ))),
            },
            Operator::Add | Operator::Subtract => {
                let (Some(id), Some(path), Some(payload)) = (id, path, payload) else {
                    return Err(LinkbaseError::UpdateLog(format!(
                        "'{operator}' on '{collection}' needs an id, a property path and a payload"
                    )));
                };
                if !self.contains(position, id) {
                    return Ok(());
                }
                let delta = if operator == Operator::Add { Delta::Add } else { Delta::Subtract };
                self.apply_delta(position, id, &PropertyPath::parse(path)?, payload, delta)
            }
            Operator::Delete => match id {
                Some(id) => self.delete_item(position, id).map(|_| ()),
                None => self.clear_collection(position).map(|_| ()),
            },
            Operator::Version => Err(LinkbaseError::UpdateLog(
                "version quintuples are checked by the update applier".to_string(),
            )),
        }
    }
}

/// The value after applying `delta` with `payload` to `current`.
/// `None` means the value stays unset.
fn combine(
    label: &str,
    field_type: Option<FieldType>,
    current: Option<&Json>,
    payload: &Json,
    delta: Delta,
) -> Result<Option<Json>> {
    let unsupported = |what: &str| {
        LinkbaseError::Validation(format!(
            "Operator '{}' does not apply to {what} value '{label}'",
            delta.symbol()
        ))
    };
    let mismatch = |expected: &str| {
        LinkbaseError::Validation(format!(
            "Operator '{}' on '{label}' expects {expected}, got {}",
            delta.symbol(),
            type_name(payload)
        ))
    };

    let kind = match field_type {
        Some(FieldType::Number) => DeltaKind::Number,
        Some(FieldType::Date) => DeltaKind::Date,
        Some(FieldType::String) => DeltaKind::String,
        Some(FieldType::Array) => DeltaKind::Array,
        Some(FieldType::Set) => DeltaKind::Set,
        Some(FieldType::Boolean) => return Err(unsupported("the boolean")),
        Some(FieldType::Object) => return Err(unsupported("the object")),
        Some(FieldType::Any) | None => match (current, payload) {
            (Some(Json::Number(_)), _) | (None, Json::Number(_)) => DeltaKind::Number,
            (Some(Json::String(_)), _) | (None, Json::String(_)) => DeltaKind::String,
            (Some(Json::Array(_)), _) | (None, _) => DeltaKind::Array,
            (Some(other), _) => return Err(unsupported(type_name(other))),
        },
    };

    match kind {
        DeltaKind::Number => {
            let amount = payload.as_f64().ok_or_else(|| mismatch("a number"))?;
            let base = match current {
                Some(value) => value.as_f64().ok_or_else(|| unsupported(type_name(value)))?,
                None => 0.0,
            };
            let result = match delta {
                Delta::Add => base + amount,
                Delta::Subtract => base - amount,
            };
            Ok(Some(number_to_json(result)))
        }
        DeltaKind::Date => {
            let amount = payload.as_f64().ok_or_else(|| mismatch("milliseconds"))?;
            let out_of_range =
                || LinkbaseError::Validation(format!("Shifting '{label}' by {amount}ms leaves the date range"));
            if !amount.is_finite() || amount.abs() >= i64::MAX as f64 {
                return Err(out_of_range());
            }
            let Some(current) = current else {
                return Err(LinkbaseError::Validation(format!("Cannot shift the unset date '{label}'")));
            };
            let base = parse_date(current).ok_or_else(|| unsupported(type_name(current)))?;
            let millis = match delta {
                Delta::Add => base.timestamp_millis().checked_add(amount as i64),
                Delta::Subtract => base.timestamp_millis().checked_sub(amount as i64),
            }
            .filter(|millis| DateTime::<Utc>::from_timestamp_millis(*millis).is_some())
            .ok_or_else(out_of_range)?;
            Ok(Some(Json::from(millis)))
        }
        DeltaKind::String => {
            let fragment = payload.as_str().ok_or_else(|| mismatch("a string"))?;
            let base = match current {
                Some(value) => value.as_str().ok_or_else(|| unsupported(type_name(value)))?,
                None if delta == Delta::Subtract => return Ok(None),
                None => "",
            };
            let mut result = base.to_string();
            match delta {
                Delta::Add => result.push_str(fragment),
                Delta::Subtract => {
                    if let Some(at) = result.rfind(fragment) {
                        result.replace_range(at..at + fragment.len(), "");
                    }
                }
            }
            Ok(Some(Json::String(result)))
        }
        DeltaKind::Array | DeltaKind::Set => {
            let mut items = match current {
                Some(Json::Array(items)) => items.clone(),
                Some(other) => return Err(unsupported(type_name(other))),
                None if delta == Delta::Subtract => return Ok(None),
                None => Vec::new(),
            };
            match (delta, kind) {
                (Delta::Add, DeltaKind::Set) if items.contains(payload) => {}
                (Delta::Add, _) => items.push(payload.clone()),
                (Delta::Subtract, _) => {
                    if let Some(at) = items.iter().rposition(|item| item == payload) {
                        items.remove(at);
                    }
                }
            }
            Ok(Some(Json::Array(items)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_delta_treats_unset_as_zero() {
        let next = combine("t.n", Some(FieldType::Number), None, &json!(3), Delta::Add).unwrap();
        assert_eq!(next, Some(json!(3)));
        let next = combine("t.n", Some(FieldType::Number), Some(&json!(3)), &json!(0.5), Delta::Subtract).unwrap();
        assert_eq!(next, Some(json!(2.5)));
        assert!(combine("t.n", Some(FieldType::Number), None, &json!("x"), Delta::Add).is_err());
    }

    #[test]
    fn test_string_subtract_removes_last_occurrence() {
        let next = combine("t.s", Some(FieldType::String), Some(&json!("abcabc")), &json!("bc"), Delta::Subtract);
        assert_eq!(next.unwrap(), Some(json!("abca")));
        let next = combine("t.s", Some(FieldType::String), Some(&json!("abc")), &json!("zz"), Delta::Subtract);
        assert_eq!(next.unwrap(), Some(json!("abc")));
        let next = combine("t.s", Some(FieldType::String), Some(&json!("ab")), &json!("c"), Delta::Add);
        assert_eq!(next.unwrap(), Some(json!("abc")));
    }

    #[test]
    fn test_array_and_set_deltas() {
        let current = json!([1, 2, 1]);
        let next = combine("t.a", Some(FieldType::Array), Some(&current), &json!(1), Delta::Subtract).unwrap();
        assert_eq!(next, Some(json!([1, 2])));
        let next = combine("t.a", Some(FieldType::Array), Some(&current), &json!(2), Delta::Add).unwrap();
        assert_eq!(next, Some(json!([1, 2, 1, 2])));

        let set = json!(["a", "b"]);
        let next = combine("t.s", Some(FieldType::Set), Some(&set), &json!("a"), Delta::Add).unwrap();
        assert_eq!(next, Some(set.clone()));
        let next = combine("t.s", Some(FieldType::Set), Some(&set), &json!("a"), Delta::Subtract).unwrap();
        assert_eq!(next, Some(json!(["b"])));
        let next = combine("t.s", Some(FieldType::Set), None, &json!("a"), Delta::Subtract).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_date_shift_in_milliseconds() {
        let next = combine(
            "t.d",
            Some(FieldType::Date),
            Some(&json!("2024-01-01T00:00:00.000Z")),
            &json!(1000),
            Delta::Add,
        )
        .unwrap()
        .unwrap();
        assert_eq!(parse_date(&next).unwrap().timestamp_millis(), 1_704_067_201_000);
        assert!(combine("t.d", Some(FieldType::Date), None, &json!(1), Delta::Add).is_err());
    }

    #[test]
    fn test_date_shift_out_of_range_is_rejected() {
        let current = json!("2024-01-01T00:00:00.000Z");
        for amount in [json!(1e19), json!(-1e19), json!(9.0e18), json!(i64::MAX)] {
            let shifted = combine("t.d", Some(FieldType::Date), Some(&current), &amount, Delta::Add);
            assert!(matches!(shifted, Err(LinkbaseError::Validation(_))), "{amount} was accepted");
        }
        let shifted = combine("t.d", Some(FieldType::Date), Some(&current), &json!(9.0e18), Delta::Subtract);
        assert!(matches!(shifted, Err(LinkbaseError::Validation(_))));
    }

    #[test]
    fn test_untyped_delta_follows_current_value() {
        let next = combine("t.x", None, Some(&json!(2)), &json!(2), Delta::Add).unwrap();
        assert_eq!(next, Some(json!(4)));
        let next = combine("t.x", Some(FieldType::Any), None, &json!({"k": 1}), Delta::Add).unwrap();
        assert_eq!(next, Some(json!([{"k": 1}])));
        assert!(combine("t.x", None, Some(&json!(true)), &json!(1), Delta::Add).is_err());
        assert!(combine("t.b", Some(FieldType::Boolean), None, &json!(true), Delta::Add).is_err());
    }
}
