//! Flattening of JSON documents to dotted-path/value pairs.
//!
//! Used when reconstructing annotated spreadsheets: a captured response
//! body is flattened so each leaf becomes one ACTUAL_ column value.

use serde_json::Value;

/// Flattens a JSON value into `(dotted_path, scalar_as_string)` pairs.
///
/// Objects contribute their keys to the path, arrays contribute `[index]`
/// segments. Scalars are rendered without surrounding quotes; null becomes
/// an empty string. Object keys are visited in `serde_json` map order, so
/// the output is deterministic for a given input.
pub fn flatten_json(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, path: String, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_into(child, child_path, out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(child, format!("{}[{}]", path, idx), out);
            }
        }
        Value::Null => out.push((path, String::new())),
        Value::String(s) => out.push((path, s.clone())),
        other => out.push((path, other.to_string())),
    }
}
