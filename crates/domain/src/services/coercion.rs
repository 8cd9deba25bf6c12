//! Template coercion engine.
//!
//! Derives spreadsheet headers from a template's shape, and rebuilds full
//! request/response bodies from flat row data, coercing each raw cell
//! string to the type implied by both its cell hint and the template leaf.
//! Cell typing alone is unreliable (a numeric ID should often stay
//! textual) and template typing alone cannot recover boolean or date
//! intent lost in plain-text export, so both are consulted.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;

use crate::models::{Cell, CellTypeHint};

/// How template arrays are traversed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArrayMode {
    /// Recurse only into index 0; remaining elements pass through verbatim.
    #[default]
    FirstElementOnly,
    /// Recurse into every present index, embedding `[i]` in the path.
    AllElements,
}

/// How leaf headers are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NamingMode {
    /// Trailing path segment, disambiguated with parent segments on collision.
    #[default]
    TrailingSegment,
    /// Full dotted path.
    FullPath,
}

/// Header derivation configuration.
#[derive(Debug, Clone, Default)]
pub struct HeaderOptions {
    pub array_mode: ArrayMode,
    pub naming: NamingMode,
    /// Prepended to every derived header, e.g. `EXPECTED_` for responses.
    pub prefix: Option<String>,
}

impl HeaderOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }
}

/// Derives the ordered header list for a template.
///
/// Deterministic for a fixed template and options: traversal is depth-first
/// with object keys in `serde_json` map order.
pub fn derive_headers(template: &Value, options: &HeaderOptions) -> Vec<String> {
    leaf_headers(template, options)
        .into_iter()
        .map(|(_, header)| header)
        .collect()
}

/// Rebuilds a body in the template's shape from flat row data.
///
/// Leaves with a supplied header value are coerced; all others keep the
/// template's original value, so partial overrides are expected. Cells
/// must already be filtered for exclusion by the caller.
pub fn reconstruct_body(
    template: &Value,
    row: &HashMap<String, Cell>,
    options: &HeaderOptions,
) -> Value {
    let header_map: HashMap<Vec<String>, String> = leaf_headers(template, options)
        .into_iter()
        .map(|(path, header)| (path, header))
        .collect();

    let mut path = Vec::new();
    rebuild(template, &mut path, &header_map, row, options)
}

/// Coerces one raw cell string to a JSON value consistent with the
/// template leaf at the same path.
pub fn coerce_value(raw: &str, hint: Option<CellTypeHint>, template_leaf: &Value) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }

    match template_leaf {
        // Template textual: always force text. Protects zero-padded IDs
        // and similar values from numeric reinterpretation.
        Value::String(_) => Value::String(raw.to_string()),
        Value::Bool(_) => match parse_loose_bool(trimmed) {
            Some(b) => Value::Bool(b),
            None => {
                warn!(value = raw, "Cell is not a boolean; keeping template value");
                template_leaf.clone()
            }
        },
        Value::Null => hint_draft(raw, trimmed, hint),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                coerce_integer(raw, trimmed, template_leaf)
            } else {
                match trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                    Some(num) => Value::Number(num),
                    None => {
                        warn!(value = raw, "Cell is not numeric; keeping template value");
                        template_leaf.clone()
                    }
                }
            }
        }
        // Non-leaf template nodes default to text to avoid silent data loss.
        _ => Value::String(raw.to_string()),
    }
}

/// Hint-based draft value, used when the template leaf is null.
fn hint_draft(raw: &str, trimmed: &str, hint: Option<CellTypeHint>) -> Value {
    match hint {
        Some(CellTypeHint::Boolean) => parse_loose_bool(trimmed)
            .map(Value::Bool)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Some(CellTypeHint::Date) => Value::String(raw.to_string()),
        Some(CellTypeHint::Numeric) => {
            parse_number(trimmed).unwrap_or_else(|| Value::String(raw.to_string()))
        }
        Some(CellTypeHint::String) | Some(CellTypeHint::Blank) => Value::String(raw.to_string()),
        // Formula results and unhinted values: number, then boolean, then text.
        Some(CellTypeHint::Formula) | None => parse_number(trimmed)
            .or_else(|| parse_loose_bool(trimmed).map(Value::Bool))
            .unwrap_or_else(|| Value::String(raw.to_string())),
    }
}

fn coerce_integer(raw: &str, trimmed: &str, template_leaf: &Value) -> Value {
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    // Whole-number decimals like "3.0" are accepted; fractions are not,
    // because an integer leaf cannot represent them.
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            return Value::Number((f as i64).into());
        }
    }
    warn!(
        value = raw,
        "Cell cannot be represented as an integer; keeping template value"
    );
    template_leaf.clone()
}

/// Loose boolean parse: true/t/yes/y/1 and false/f/no/n/0, case-insensitive.
fn parse_loose_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_number(value: &str) -> Option<Value> {
    if let Ok(i) = value.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    value
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Collects `(leaf path, header name)` pairs in traversal order.
fn leaf_headers(template: &Value, options: &HeaderOptions) -> Vec<(Vec<String>, String)> {
    let mut paths = Vec::new();
    let mut current = Vec::new();
    collect_leaf_paths(template, &mut current, options.array_mode, &mut paths);

    let names = match options.naming {
        NamingMode::FullPath => paths.iter().map(|p| p.join(".")).collect(),
        NamingMode::TrailingSegment => disambiguate(&paths),
    };

    paths
        .into_iter()
        .zip(names)
        .map(|(path, name)| (path, format!("{}{}", options.prefix(), name)))
        .collect()
}

fn collect_leaf_paths(
    node: &Value,
    path: &mut Vec<String>,
    array_mode: ArrayMode,
    out: &mut Vec<Vec<String>>,
) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                collect_leaf_paths(child, path, array_mode, out);
                path.pop();
            }
        }
        Value::Array(items) => match array_mode {
            ArrayMode::FirstElementOnly => {
                if let Some(first) = items.first() {
                    collect_leaf_paths(first, path, array_mode, out);
                }
            }
            ArrayMode::AllElements => {
                for (idx, child) in items.iter().enumerate() {
                    with_index_segment(path, idx, |path| {
                        collect_leaf_paths(child, path, array_mode, out)
                    });
                }
            }
        },
        _ => {
            if path.is_empty() {
                out.push(vec!["value".to_string()]);
            } else {
                out.push(path.clone());
            }
        }
    }
}

/// Appends `[idx]` to the trailing path segment for the duration of `f`.
fn with_index_segment<R>(path: &mut Vec<String>, idx: usize, f: impl FnOnce(&mut Vec<String>) -> R) -> R {
    match path.pop() {
        Some(last) => {
            path.push(format!("{}[{}]", last, idx));
            let result = f(path);
            path.pop();
            path.push(last);
            result
        }
        None => {
            path.push(format!("[{}]", idx));
            let result = f(path);
            path.pop();
            result
        }
    }
}

/// Trailing-segment names, extended with parent segments until unique.
fn disambiguate(paths: &[Vec<String>]) -> Vec<String> {
    let mut depths = vec![1usize; paths.len()];

    loop {
        let names: Vec<String> = paths
            .iter()
            .zip(&depths)
            .map(|(path, depth)| tail_name(path, *depth))
            .collect();

        let mut counts: HashMap<&String, usize> = HashMap::new();
        for name in &names {
            *counts.entry(name).or_insert(0) += 1;
        }

        let mut changed = false;
        for (idx, name) in names.iter().enumerate() {
            if counts[name] > 1 && depths[idx] < paths[idx].len() {
                depths[idx] += 1;
                changed = true;
            }
        }

        if !changed {
            return names;
        }
    }
}

fn tail_name(path: &[String], depth: usize) -> String {
    let start = path.len().saturating_sub(depth);
    path[start..].join(".")
}

fn rebuild(
    node: &Value,
    path: &mut Vec<String>,
    headers: &HashMap<Vec<String>, String>,
    row: &HashMap<String, Cell>,
    options: &HeaderOptions,
) -> Value {
    match node {
        Value::Object(map) => {
            let mut rebuilt = Map::with_capacity(map.len());
            for (key, child) in map {
                path.push(key.clone());
                rebuilt.insert(key.clone(), rebuild(child, path, headers, row, options));
                path.pop();
            }
            Value::Object(rebuilt)
        }
        Value::Array(items) => rebuild_array(items, path, headers, row, options),
        leaf => {
            let header = match options.naming {
                NamingMode::FullPath => {
                    let dotted = if path.is_empty() {
                        "value".to_string()
                    } else {
                        path.join(".")
                    };
                    Some(format!("{}{}", options.prefix(), dotted))
                }
                NamingMode::TrailingSegment => headers.get(path.as_slice()).cloned(),
            };

            match header.and_then(|h| row.get(&h)) {
                Some(cell) => coerce_value(&cell.value, Some(cell.type_hint), leaf),
                None => leaf.clone(),
            }
        }
    }
}

fn rebuild_array(
    items: &[Value],
    path: &mut Vec<String>,
    headers: &HashMap<Vec<String>, String>,
    row: &HashMap<String, Cell>,
    options: &HeaderOptions,
) -> Value {
    match options.array_mode {
        ArrayMode::FirstElementOnly => {
            let rebuilt: Vec<Value> = items
                .iter()
                .enumerate()
                .map(|(idx, child)| {
                    if idx == 0 {
                        rebuild(child, path, headers, row, options)
                    } else {
                        child.clone()
                    }
                })
                .collect();
            Value::Array(rebuilt)
        }
        ArrayMode::AllElements => {
            let mut rebuilt: Vec<Value> = items
                .iter()
                .enumerate()
                .map(|(idx, child)| {
                    with_index_segment(path, idx, |path| {
                        rebuild(child, path, headers, row, options)
                    })
                })
                .collect();

            // Dotted-header naming lets the spreadsheet drive arrays longer
            // than the template: scan supplied headers for extra indices.
            if options.naming == NamingMode::FullPath {
                if let Some(element_template) = items.first() {
                    let mut idx = items.len();
                    while index_supplied(row, path, idx, options) {
                        let extra = with_index_segment(path, idx, |path| {
                            rebuild(element_template, path, headers, row, options)
                        });
                        rebuilt.push(extra);
                        idx += 1;
                    }
                }
            }

            Value::Array(rebuilt)
        }
    }
}

/// True when any supplied header addresses `path[idx]`.
fn index_supplied(
    row: &HashMap<String, Cell>,
    path: &[String],
    idx: usize,
    options: &HeaderOptions,
) -> bool {
    let dotted = path.join(".");
    let needle = format!("{}{}[{}]", options.prefix(), dotted, idx);
    row.keys()
        .any(|key| key == &needle || key.starts_with(&format!("{}.", needle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cell(value: &str, hint: CellTypeHint) -> Cell {
        Cell::new(value, hint)
    }

    fn row(entries: &[(&str, &str, CellTypeHint)]) -> HashMap<String, Cell> {
        entries
            .iter()
            .map(|(header, value, hint)| (header.to_string(), cell(value, *hint)))
            .collect()
    }

    #[test]
    fn test_derive_headers_flat_object() {
        let template = json!({"amount": 10, "currency": "EUR"});
        let headers = derive_headers(&template, &HeaderOptions::default());
        assert_eq!(headers, vec!["amount", "currency"]);
    }

    #[test]
    fn test_derive_headers_deterministic() {
        let template = json!({"a": {"x": 1}, "b": [{"y": true}]});
        let opts = HeaderOptions::default();
        assert_eq!(derive_headers(&template, &opts), derive_headers(&template, &opts));
    }

    #[test]
    fn test_derive_headers_collision_disambiguated_with_parent() {
        let template = json!({"billing": {"id": 1}, "shipping": {"id": 2}, "name": "x"});
        let headers = derive_headers(&template, &HeaderOptions::default());
        assert_eq!(headers, vec!["billing.id", "name", "shipping.id"]);
    }

    #[test]
    fn test_derive_headers_prefix() {
        let template = json!({"status": "OK"});
        let headers = derive_headers(&template, &HeaderOptions::with_prefix("EXPECTED_"));
        assert_eq!(headers, vec!["EXPECTED_status"]);
    }

    #[test]
    fn test_derive_headers_full_path_naming() {
        let template = json!({"order": {"lines": [{"sku": "A"}]}});
        let opts = HeaderOptions {
            naming: NamingMode::FullPath,
            ..Default::default()
        };
        assert_eq!(derive_headers(&template, &opts), vec!["order.lines.sku"]);
    }

    #[test]
    fn test_derive_headers_all_elements_mode() {
        let template = json!({"items": [{"id": 1}, {"id": 2}]});
        let opts = HeaderOptions {
            array_mode: ArrayMode::AllElements,
            naming: NamingMode::FullPath,
            ..Default::default()
        };
        assert_eq!(derive_headers(&template, &opts), vec!["items[0].id", "items[1].id"]);
    }

    #[test]
    fn test_derive_headers_all_elements_trailing_disambiguates_indices() {
        let template = json!({"items": [{"id": 1}, {"id": 2}]});
        let opts = HeaderOptions {
            array_mode: ArrayMode::AllElements,
            ..Default::default()
        };
        let headers = derive_headers(&template, &opts);
        assert_eq!(headers, vec!["items[0].id", "items[1].id"]);
    }

    #[test]
    fn test_coerce_empty_and_null_literals() {
        assert_eq!(coerce_value("", None, &json!("x")), Value::Null);
        assert_eq!(coerce_value("  ", None, &json!(1)), Value::Null);
        assert_eq!(coerce_value("null", None, &json!(true)), Value::Null);
        assert_eq!(coerce_value("NULL", None, &json!("x")), Value::Null);
    }

    #[test]
    fn test_coerce_template_string_forces_text() {
        // Zero-padded IDs must survive a NUMERIC cell hint.
        let result = coerce_value("0042", Some(CellTypeHint::Numeric), &json!("0001"));
        assert_eq!(result, json!("0042"));
    }

    #[test]
    fn test_coerce_template_bool_loose_parse() {
        let leaf = json!(false);
        for truthy in ["true", "T", "yes", "Y", "1"] {
            assert_eq!(coerce_value(truthy, Some(CellTypeHint::String), &leaf), json!(true));
        }
        for falsy in ["false", "f", "NO", "n", "0"] {
            assert_eq!(coerce_value(falsy, Some(CellTypeHint::String), &leaf), json!(false));
        }
    }

    #[test]
    fn test_coerce_template_bool_unparsable_keeps_template() {
        assert_eq!(
            coerce_value("maybe", Some(CellTypeHint::String), &json!(true)),
            json!(true)
        );
    }

    #[test]
    fn test_coerce_integer_accepts_whole_number_decimal() {
        // Scenario: template {"count": 3} with override "3.0".
        assert_eq!(coerce_value("3.0", Some(CellTypeHint::Numeric), &json!(3)), json!(3));
    }

    #[test]
    fn test_coerce_integer_rejects_fraction_keeping_template() {
        assert_eq!(coerce_value("3.5", Some(CellTypeHint::Numeric), &json!(3)), json!(3));
    }

    #[test]
    fn test_coerce_integer_out_of_range_keeps_template() {
        let result = coerce_value("1e300", Some(CellTypeHint::Numeric), &json!(7));
        assert_eq!(result, json!(7));
    }

    #[test]
    fn test_coerce_decimal_preserves_precision() {
        assert_eq!(
            coerce_value("2.75", Some(CellTypeHint::Numeric), &json!(1.5)),
            json!(2.75)
        );
    }

    #[test]
    fn test_coerce_template_null_uses_hint_draft() {
        assert_eq!(
            coerce_value("12", Some(CellTypeHint::Numeric), &Value::Null),
            json!(12)
        );
        assert_eq!(
            coerce_value("yes", Some(CellTypeHint::Boolean), &Value::Null),
            json!(true)
        );
        assert_eq!(
            coerce_value("2024-05-01", Some(CellTypeHint::Date), &Value::Null),
            json!("2024-05-01")
        );
        assert_eq!(
            coerce_value("free text", Some(CellTypeHint::String), &Value::Null),
            json!("free text")
        );
    }

    #[test]
    fn test_coerce_formula_fallback_chain() {
        assert_eq!(coerce_value("41", Some(CellTypeHint::Formula), &Value::Null), json!(41));
        assert_eq!(
            coerce_value("yes", Some(CellTypeHint::Formula), &Value::Null),
            json!(true)
        );
        assert_eq!(
            coerce_value("plain", Some(CellTypeHint::Formula), &Value::Null),
            json!("plain")
        );
    }

    #[test]
    fn test_coerce_idempotent_for_correctly_typed_values() {
        let cases = [
            (json!(3), "3"),
            (json!(true), "true"),
            (json!("abc"), "abc"),
            (json!(1.5), "1.5"),
        ];
        for (leaf, raw) in cases {
            let first = coerce_value(raw, None, &leaf);
            let second = coerce_value(&value_to_raw(&first), None, &leaf);
            assert_eq!(first, second, "coercion of {raw:?} not idempotent");
        }
    }

    fn value_to_raw(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    #[test]
    fn test_reconstruct_partial_override() {
        let template = json!({"amount": 10, "currency": "EUR", "note": "fixed"});
        let data = row(&[("amount", "25", CellTypeHint::Numeric)]);
        let body = reconstruct_body(&template, &data, &HeaderOptions::default());
        assert_eq!(body, json!({"amount": 25, "currency": "EUR", "note": "fixed"}));
    }

    #[test]
    fn test_reconstruct_nested_and_array_first_element() {
        let template = json!({
            "order": {"id": "O-1", "lines": [{"sku": "A", "qty": 1}, {"sku": "B", "qty": 2}]}
        });
        let data = row(&[("sku", "C", CellTypeHint::String), ("qty", "9", CellTypeHint::Numeric)]);
        let body = reconstruct_body(&template, &data, &HeaderOptions::default());

        // First element rebuilt, second untouched.
        assert_eq!(body["order"]["lines"][0], json!({"sku": "C", "qty": 9}));
        assert_eq!(body["order"]["lines"][1], json!({"sku": "B", "qty": 2}));
    }

    #[test]
    fn test_reconstruct_extra_array_indices_from_headers() {
        let template = json!({"items": [{"id": 1}]});
        let opts = HeaderOptions {
            array_mode: ArrayMode::AllElements,
            naming: NamingMode::FullPath,
            ..Default::default()
        };
        let data = row(&[
            ("items[0].id", "5", CellTypeHint::Numeric),
            ("items[1].id", "7", CellTypeHint::Numeric),
            ("items[2].id", "9", CellTypeHint::Numeric),
        ]);
        let body = reconstruct_body(&template, &data, &opts);
        assert_eq!(body, json!({"items": [{"id": 5}, {"id": 7}, {"id": 9}]}));
    }

    #[test]
    fn test_reconstruct_empty_cell_becomes_null() {
        let template = json!({"note": "keep"});
        let data = row(&[("note", "", CellTypeHint::Blank)]);
        let body = reconstruct_body(&template, &data, &HeaderOptions::default());
        assert_eq!(body, json!({"note": null}));
    }
}
