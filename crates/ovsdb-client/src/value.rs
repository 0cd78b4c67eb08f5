//! OVSDB value encoding (RFC 7047 §5.1).
//!
//! Atoms are plain JSON scalars or tagged pairs (`["uuid", "..."]`,
//! `["named-uuid", "..."]`). Sets are `["set", [atom, ...]]`, except that a
//! single-element set may be sent as the bare atom. Maps are
//! `["map", [[key, value], ...]]`. Optional columns are sets of size 0 or 1.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Encodes a reference to an existing row.
pub fn uuid(uuid: &str) -> Value {
    json!(["uuid", uuid])
}

/// Encodes a reference to a row inserted earlier in the same transaction.
pub fn named_uuid(name: &str) -> Value {
    json!(["named-uuid", name])
}

/// Encodes a set.
pub fn set<I>(items: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    json!(["set", items.into_iter().collect::<Vec<_>>()])
}

/// Encodes a string-to-string map.
pub fn string_map<'a, I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let pairs: Vec<Value> = pairs.into_iter().map(|(k, v)| json!([k, v])).collect();
    json!(["map", pairs])
}

/// Returns the uuid of a `["uuid", ...]` atom.
pub fn as_uuid(v: &Value) -> Option<&str> {
    match v.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::String(id)]) if tag == "uuid" => Some(id.as_str()),
        _ => None,
    }
}

/// Decodes a set of uuids (also accepts a single bare uuid atom).
pub fn as_uuid_set(v: &Value) -> Vec<String> {
    set_members(v)
        .iter()
        .filter_map(as_uuid)
        .map(str::to_string)
        .collect()
}

/// Decodes an optional uuid (a set of size 0 or 1).
pub fn as_optional_uuid(v: &Value) -> Option<String> {
    as_uuid_set(v).into_iter().next()
}

/// Decodes an optional boolean (a set of size 0 or 1).
pub fn as_optional_bool(v: &Value) -> Option<bool> {
    set_members(v).iter().find_map(Value::as_bool)
}

/// Decodes a string-to-string map. Entries whose key or value is not a
/// string are skipped.
pub fn as_string_map(v: &Value) -> BTreeMap<String, String> {
    let mut ret = BTreeMap::new();
    let pairs = match v.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::Array(pairs)]) if tag == "map" => pairs,
        _ => {
            if !v.is_null() {
                tracing::warn!("Got unexpected map value: {v}");
            }
            return ret;
        }
    };
    for kv in pairs {
        if let Some([Value::String(k), Value::String(v)]) = kv.as_array().map(Vec::as_slice) {
            ret.insert(k.clone(), v.clone());
        }
    }
    ret
}

/// Returns the members of a set, treating a bare atom as a set of one.
fn set_members(v: &Value) -> Vec<Value> {
    match v.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::Array(items)]) if tag == "set" => items.clone(),
        _ if v.is_null() => Vec::new(),
        _ => vec![v.clone()],
    }
}
