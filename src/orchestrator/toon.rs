//! TOON: a line-oriented, tabular-friendly text encoding for embed content and tool-response
//! bodies.
//!
//! Objects render as `key: value` pairs, one per line. A `Vec` of uniform objects renders as a
//! tabular block: `key[N]{col1,col2,...}:` followed by one comma-joined row per element. Nested
//! objects are flattened into `parent_child` scalar keys before encoding and lists of primitives
//! are pipe-joined, per the flattening rules the embed service applies before every encode.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde_json::{Map, Value};

/// Flatten an arbitrary JSON tree into the TOON-friendly shape: nested objects become
/// `parent_child` scalar keys, primitive lists become pipe-joined strings, and lists of objects
/// are recursively flattened so they can render as a tabular block. Key order follows first
/// appearance, matching the reference encoder's determinism requirement.
pub fn flatten_for_toon(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(flatten_object(map, "")),
        Value::Array(items) => Value::Array(items.iter().map(flatten_for_toon).collect()),
        other => other.clone(),
    }
}

fn flatten_object(map: &Map<String, Value>, prefix: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let flat_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}_{}", prefix, key)
        };
        match value {
            Value::Object(nested) => {
                let nested_flat = flatten_object(nested, &flat_key);
                out.extend(nested_flat);
            }
            Value::Array(items) => {
                if is_uniform_object_array(items) {
                    let flattened_rows: Vec<Value> = items
                        .iter()
                        .map(|row| match row {
                            Value::Object(m) => Value::Object(flatten_object(m, "")),
                            other => other.clone(),
                        })
                        .collect();
                    out.insert(flat_key, Value::Array(flattened_rows));
                } else if items.iter().all(is_primitive) {
                    let joined = items.iter().map(primitive_to_string).collect::<Vec<_>>().join("|");
                    out.insert(flat_key, Value::String(joined));
                } else {
                    out.insert(flat_key, Value::Array(items.iter().map(flatten_for_toon).collect()));
                }
            }
            other => {
                out.insert(flat_key, other.clone());
            }
        }
    }
    out
}

fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn is_uniform_object_array(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|v| matches!(v, Value::Object(_)))
}

fn primitive_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Encode a (flattened) JSON value as TOON text.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) => encode_object(map, &mut out, 0),
        Value::Array(items) => encode_array("value", items, &mut out, 0),
        other => out.push_str(&primitive_to_string(other)),
    }
    out
}

fn indent(level: usize) -> String {
    "  ".repeat(level)
}

fn encode_object(map: &Map<String, Value>, out: &mut String, level: usize) {
    for (key, value) in map {
        match value {
            Value::Array(items) if is_uniform_object_array(items) => {
                encode_array(key, items, out, level);
            }
            Value::Object(nested) => {
                out.push_str(&format!("{}{}:\n", indent(level), key));
                encode_object(nested, out, level + 1);
            }
            other => {
                out.push_str(&format!("{}{}: {}\n", indent(level), key, scalar(other)));
            }
        }
    }
}

fn encode_array(key: &str, items: &[Value], out: &mut String, level: usize) {
    let columns = table_columns(items);
    out.push_str(&format!(
        "{}{}[{}]{{{}}}:\n",
        indent(level),
        key,
        items.len(),
        columns.join(",")
    ));
    for row in items {
        let Value::Object(map) = row else { continue };
        let cells: Vec<String> = columns
            .iter()
            .map(|c| map.get(c).map(scalar).unwrap_or_default())
            .collect();
        out.push_str(&format!("{}{}\n", indent(level + 1), cells.join(",")));
    }
}

/// Column order for a uniform object array: first-appearance order across all rows, matching
/// the reference encoder's determinism requirement rather than alphabetizing.
fn table_columns(items: &[Value]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut columns = Vec::new();
    for row in items {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }
    }
    columns
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Decode TOON text back into an equivalent JSON tree: scalar `key: value` lines become object
/// entries, `key[N]{cols}:` blocks become arrays of row objects. This is the inverse of
/// [`encode`] on the flattened shape — it does not unflatten `parent_child` keys back into
/// nested objects, since round-tripping is only promised "after the same flattening" per the
/// embed service's round-trip law.
pub fn decode(text: &str) -> Value {
    let lines: Vec<&str> = text.lines().collect();
    let mut map = Map::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        let depth = (line.len() - trimmed.len()) / 2;
        if depth != 0 {
            i += 1;
            continue;
        }
        if let Some((key, count, columns)) = parse_table_header(trimmed) {
            let mut rows = Vec::new();
            let mut j = i + 1;
            while j < lines.len() && rows.len() < count {
                let row_line = lines[j].trim_start();
                if row_line.is_empty() {
                    break;
                }
                let cells = split_unescaped(row_line);
                let mut row = Map::new();
                for (col, cell) in columns.iter().zip(cells.iter()) {
                    row.insert(col.clone(), Value::String(cell.clone()));
                }
                rows.push(Value::Object(row));
                j += 1;
            }
            map.insert(key, Value::Array(rows));
            i = j;
            continue;
        }
        if let Some((key, val)) = trimmed.split_once(": ") {
            map.insert(key.to_string(), Value::String(val.to_string()));
        } else if let Some(key) = trimmed.strip_suffix(':') {
            map.insert(key.to_string(), Value::String(String::new()));
        }
        i += 1;
    }
    Value::Object(map)
}

fn parse_table_header(line: &str) -> Option<(String, usize, Vec<String>)> {
    let colon = line.strip_suffix(':')?;
    let open_bracket = colon.find('[')?;
    let key = colon[..open_bracket].to_string();
    let rest = &colon[open_bracket + 1..];
    let close_bracket = rest.find(']')?;
    let count: usize = rest[..close_bracket].parse().ok()?;
    let rest = &rest[close_bracket + 1..];
    let open_brace = rest.find('{')?;
    let close_brace = rest.find('}')?;
    let columns: Vec<String> = rest[open_brace + 1..close_brace]
        .split(',')
        .map(|s| s.to_string())
        .collect();
    Some((key, count, columns))
}

fn split_unescaped(line: &str) -> Vec<String> {
    line.split(',').map(|s| s.to_string()).collect()
}

/// Apply a consumer's `ignore_fields_for_inference` list to a flattened result map, dropping
/// those keys while always preserving the essential fields `url`, `page_age`, `profile.name`
/// (and their flattened form `profile_name`).
pub fn filter_for_inference(value: &Value, ignore_fields: &[String]) -> Value {
    const ALWAYS_KEEP: [&str; 3] = ["url", "page_age", "profile_name"];
    let ignore: HashMap<&str, ()> = ignore_fields
        .iter()
        .map(|s| s.as_str())
        .filter(|f| !ALWAYS_KEEP.contains(f))
        .map(|f| (f, ()))
        .collect();
    match value {
        Value::Object(map) => {
            let filtered: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !ignore.contains_key(k.as_str()))
                .map(|(k, v)| (k.clone(), filter_for_inference(v, ignore_fields)))
                .collect();
            Value::Object(filtered)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| filter_for_inference(v, ignore_fields)).collect())
        }
        other => other.clone(),
    }
}

/// Stable sort of a JSON object's keys by first-appearance order, used when building canonical
/// arguments for the tool-call content hash.
pub fn canonical_sorted_keys(value: &Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_joins_primitive_lists_with_pipes() {
        let input = json!({"languages": ["en", "es", "fr"]});
        let flat = flatten_for_toon(&input);
        assert_eq!(flat["languages"], json!("en|es|fr"));
    }

    #[test]
    fn flatten_collapses_nested_objects_to_parent_child_keys() {
        let input = json!({"profile": {"name": "Ada"}});
        let flat = flatten_for_toon(&input);
        assert_eq!(flat["profile_name"], json!("Ada"));
        assert!(flat.get("profile").is_none());
    }

    #[test]
    fn encode_renders_tabular_block_for_uniform_object_arrays() {
        let input = json!({
            "results": [
                {"id": 1, "title": "a"},
                {"id": 2, "title": "b"}
            ]
        });
        let flat = flatten_for_toon(&input);
        let out = encode(&flat);
        assert!(out.contains("results[2]{id,title}:"));
        assert!(out.contains("1,a"));
        assert!(out.contains("2,b"));
    }

    #[test]
    fn decode_recovers_tabular_rows() {
        let text = "results[2]{id,title}:\n  1,a\n  2,b\n";
        let decoded = decode(text);
        let rows = decoded["results"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], json!("a"));
    }

    #[test]
    fn round_trip_scalar_object_is_equivalent() {
        let input = json!({"app_id": "web", "skill_id": "search", "status": "processing"});
        let flat = flatten_for_toon(&input);
        let encoded = encode(&flat);
        let decoded = decode(&encoded);
        assert_eq!(decoded["app_id"], json!("web"));
        assert_eq!(decoded["status"], json!("processing"));
    }

    #[test]
    fn filter_for_inference_always_keeps_essential_fields() {
        let input = json!({"url": "https://x.test", "secret_token": "abc", "page_age": "2d"});
        let filtered = filter_for_inference(&input, &["url".to_string(), "secret_token".to_string()]);
        assert_eq!(filtered["url"], json!("https://x.test"));
        assert_eq!(filtered["page_age"], json!("2d"));
        assert!(filtered.get("secret_token").is_none());
    }
}
