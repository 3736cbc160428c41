//! Key case conversion: outgoing member names are dasherized, incoming ones de-dasherized.

use serde_json::{Map, Value};

/// Convert a single identifier from snake_case to dash-case.
/// e.g. "display_name" -> "display-name"
pub fn dasherize(s: &str) -> String {
    s.replace('_', "-")
}

/// Convert a single identifier from dash-case to snake_case.
/// e.g. "display-name" -> "display_name"
pub fn dedasherize(s: &str) -> String {
    s.replace('-', "_")
}

/// Dasherize all keys of a JSON object (in place). Nested values are left alone.
pub fn object_keys_dasherized(obj: &mut Map<String, Value>) {
    rekey(obj, dasherize);
}

/// De-dasherize all keys of a JSON object (in place).
/// Used for request attributes so helpers see snake_case names.
pub fn object_keys_dedasherized(obj: &mut Map<String, Value>) {
    rekey(obj, dedasherize);
}

fn rekey(obj: &mut Map<String, Value>, f: fn(&str) -> String) {
    let keys: Vec<String> = obj.keys().cloned().collect();
    // Rebuild rather than remove/insert so preserve_order keeps the payload order.
    if keys.iter().all(|k| f(k) == *k) {
        return;
    }
    let old = std::mem::take(obj);
    for (k, v) in old {
        obj.insert(f(&k), v);
    }
}

/// Recursively de-dasherize object keys in a Value (objects and arrays of objects).
pub fn value_keys_dedasherized_recursive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            object_keys_dedasherized(map);
            for (_, v) in map.iter_mut() {
                value_keys_dedasherized_recursive(v);
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                value_keys_dedasherized_recursive(v);
            }
        }
        _ => {}
    }
}
