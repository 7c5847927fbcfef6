//! Typed partial patches layered onto cached entity state

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// One field of a patch
#[derive(Debug, Clone, PartialEq)]
pub enum PatchField {
    /// Replace the base value wholesale (scalars, arrays, null)
    Replace(Value),
    /// Merge into the base value when it is an object, replace it otherwise
    Merge(Patch),
}

/// A validated partial update: only present fields are touched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: BTreeMap<String, PatchField>,
}

impl Patch {
    /// Build a patch from untyped JSON.
    ///
    /// The root must be an object and every key must be non-empty.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::InvalidInput(format!(
                "patch must be a JSON object, got {}",
                json_kind(value)
            )));
        };
        Self::from_map(map, "")
    }

    fn from_map(map: &Map<String, Value>, path: &str) -> Result<Self> {
        let mut fields = BTreeMap::new();
        for (key, value) in map {
            if key.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "patch has an empty key at '{}'",
                    if path.is_empty() { "<root>" } else { path }
                )));
            }
            let field_path = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            let field = match value {
                Value::Object(nested) => PatchField::Merge(Self::from_map(nested, &field_path)?),
                other => PatchField::Replace(other.clone()),
            };
            fields.insert(key.clone(), field);
        }
        Ok(Self { fields })
    }

    /// Apply onto `base`; a non-object base is treated as empty
    pub fn apply(&self, base: &Value) -> Value {
        let mut merged = match base {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        self.apply_to_map(&mut merged);
        Value::Object(merged)
    }

    fn apply_to_map(&self, target: &mut Map<String, Value>) {
        for (key, field) in &self.fields {
            match field {
                PatchField::Replace(value) => {
                    target.insert(key.clone(), value.clone());
                }
                PatchField::Merge(nested) => match target.get_mut(key) {
                    Some(Value::Object(existing)) => nested.apply_to_map(existing),
                    _ => {
                        target.insert(key.clone(), nested.to_value());
                    }
                },
            }
        }
    }

    /// Back to plain JSON
    pub fn to_value(&self) -> Value {
        let map = self
            .fields
            .iter()
            .map(|(key, field)| {
                let value = match field {
                    PatchField::Replace(value) => value.clone(),
                    PatchField::Merge(nested) => nested.to_value(),
                };
                (key.clone(), value)
            })
            .collect::<Map<_, _>>();
        Value::Object(map)
    }
}

/// Layer `incoming` onto `base`: nested objects merge, everything else replaces.
pub fn merge_patch(base: &Value, incoming: &Value) -> Result<Value> {
    Ok(Patch::from_value(incoming)?.apply(base))
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn nested_objects_merge_without_losing_siblings() {
        let base = json!({
            "title": "Spring tour",
            "venue": {"name": "Hall", "address": {"city": "Oslo", "zip": "0150"}},
            "fee": 500
        });
        let incoming = json!({"venue": {"address": {"city": "Bergen"}}, "fee": 750});

        let merged = merge_patch(&base, &incoming).unwrap();
        assert_eq!(
            merged,
            json!({
                "title": "Spring tour",
                "venue": {"name": "Hall", "address": {"city": "Bergen", "zip": "0150"}},
                "fee": 750
            })
        );
    }

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let base = json!({"lineup": ["m1", "m2"], "tags": {"a": 1}});
        let incoming = json!({"lineup": ["m3"], "tags": ["x"]});

        let merged = merge_patch(&base, &incoming).unwrap();
        assert_eq!(merged, json!({"lineup": ["m3"], "tags": ["x"]}));
    }

    #[test]
    fn object_replaces_scalar_base() {
        let base = json!({"venue": "TBD"});
        let incoming = json!({"venue": {"name": "Hall"}});
        assert_eq!(
            merge_patch(&base, &incoming).unwrap(),
            json!({"venue": {"name": "Hall"}})
        );
    }

    #[test]
    fn null_is_an_explicit_replacement() {
        let base = json!({"notes": "bring cables"});
        let merged = merge_patch(&base, &json!({"notes": null})).unwrap();
        assert_eq!(merged, json!({"notes": null}));
    }

    #[test]
    fn merge_is_idempotent() {
        let base = json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"});
        let patches = [
            json!({"a": {"b": 2}}),
            json!({"a": {"c": [3]}, "e": {"f": {"g": true}}}),
            json!({"a": 5}),
            json!({}),
        ];
        for patch in patches {
            let once = merge_patch(&base, &patch).unwrap();
            let twice = merge_patch(&once, &patch).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn non_object_patch_is_rejected() {
        assert!(merge_patch(&json!({}), &json!([1, 2])).is_err());
        assert!(merge_patch(&json!({}), &json!("title")).is_err());
    }

    #[test]
    fn empty_keys_are_rejected() {
        let error = Patch::from_value(&json!({"venue": {"": 1}})).unwrap_err();
        assert!(error.to_string().contains("venue"));
    }

    #[test]
    fn patch_to_value_keeps_fields() {
        let patch = Patch::from_value(&json!({"title": "x"})).unwrap();
        assert_eq!(patch.to_value(), json!({"title": "x"}));
    }
}
