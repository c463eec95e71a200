//! RFC 7386 JSON merge patch.

use serde_json::{Map, Value};

/// Apply `patch` to `target`. `null` members remove the field.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (field, value) in patch {
            if value.is_null() {
                target.remove(field);
            } else {
                merge_patch(target.entry(field.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// The document a store holds for `value`: object members that are `null`
/// are dropped, recursively. Arrays are kept as they are.
pub fn normalize(value: &Value) -> Value {
    let mut normalized = Value::Object(Map::new());
    merge_patch(&mut normalized, value);
    normalized
}

/// Merge patch that turns `from` into `to`.
///
/// Fields present in `from` but missing (or `null`) in `to` are sent as
/// `null` so they are removed. Unchanged fields are left out.
pub fn merge_diff(from: &Value, to: &Value) -> Value {
    let (Value::Object(from), Value::Object(to)) = (from, to) else {
        return to.clone();
    };

    let mut diff = Map::new();
    for (field, old) in from {
        if !old.is_null() && to.get(field).is_none_or(Value::is_null) {
            diff.insert(field.clone(), Value::Null);
        }
    }
    for (field, new) in to {
        if new.is_null() {
            continue;
        }
        match from.get(field) {
            Some(old) if old == new => {}
            Some(old) if old.is_object() && new.is_object() => {
                diff.insert(field.clone(), merge_diff(old, new));
            }
            _ => {
                diff.insert(field.clone(), new.clone());
            }
        }
    }
    Value::Object(diff)
}
