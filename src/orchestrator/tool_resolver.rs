//! Name resolution, argument normalization, and schema validation for a single tool call.
//!
//! LLMs hallucinate tool names under light transformation (hyphen vs underscore, occasionally
//! truncated). This module builds a resolver map once per session from the discovered tool list
//! and uses it to turn a raw `(name, arguments_json)` pair into a `(app_id, skill_id)` plus
//! normalized, schema-checked arguments.

use std::collections::HashMap;

use serde_json::Value;

use crate::cloudllm::client_wrapper::ToolDefinition;

/// Two-way lookup from both hyphen and underscore spellings of `app-skill` to the canonical
/// `(app_id, skill_id)` pair, plus the original schema for validation.
pub struct ToolResolver {
    by_name: HashMap<String, (String, String)>,
    schemas: HashMap<(String, String), Value>,
    available_names: Vec<String>,
}

impl ToolResolver {
    /// Build a resolver from the tool definitions assembled for one iteration. `name` is
    /// expected in `app-skill` form; both the hyphen and underscore spelling are indexed.
    pub fn from_definitions(definitions: &[ToolDefinition]) -> Self {
        let mut by_name = HashMap::new();
        let mut schemas = HashMap::new();
        let mut available_names = Vec::new();

        for def in definitions {
            available_names.push(def.name.clone());
            let Some((app_id, skill_id)) = split_app_skill(&def.name) else {
                continue;
            };
            let hyphen = format!("{}-{}", app_id, skill_id);
            let underscore = format!("{}_{}", app_id, skill_id);
            by_name.insert(hyphen, (app_id.clone(), skill_id.clone()));
            by_name.insert(underscore, (app_id.clone(), skill_id.clone()));
            schemas.insert((app_id, skill_id), def.parameters_schema.clone());
        }

        Self {
            by_name,
            schemas,
            available_names,
        }
    }

    /// Resolve an LLM-supplied tool name into `(app_id, skill_id)`.
    ///
    /// Falls back to splitting the raw name on the first `-` or `_` when it isn't present in
    /// the indexed map (the LLM may invent a name for a tool it was never offered); both halves
    /// must be non-empty after trimming or resolution fails.
    pub fn resolve(&self, requested_name: &str) -> Result<(String, String), ResolveError> {
        if let Some((app_id, skill_id)) = self.by_name.get(requested_name) {
            return Ok((app_id.clone(), skill_id.clone()));
        }
        if let Some((app_id, skill_id)) = split_app_skill(requested_name) {
            return Ok((app_id, skill_id));
        }
        Err(ResolveError {
            requested_name: requested_name.to_string(),
            available_tools: self.available_names.clone(),
        })
    }

    pub fn schema_for(&self, app_id: &str, skill_id: &str) -> Option<&Value> {
        self.schemas.get(&(app_id.to_string(), skill_id.to_string()))
    }
}

/// Structured error mirroring the `{"error": ..., "available_tools": [...], "hint": ...}`
/// tool-response body the LLM receives on an unresolvable name, so it can self-correct.
#[derive(Debug, Clone)]
pub struct ResolveError {
    pub requested_name: String,
    pub available_tools: Vec<String>,
}

impl ResolveError {
    pub fn to_tool_response_json(&self) -> Value {
        serde_json::json!({
            "error": format!("Tool '{}' does not exist.", self.requested_name),
            "available_tools": self.available_tools,
            "hint": "Use one of the available_tools names exactly, or split on '-'/'_' to retry with app_id and skill_id separately.",
        })
    }
}

fn split_app_skill(name: &str) -> Option<(String, String)> {
    let separator = name.find('-').or_else(|| name.find('_'))?;
    let (app_id, rest) = name.split_at(separator);
    let skill_id = &rest[1..];
    let app_id = app_id.trim();
    let skill_id = skill_id.trim();
    if app_id.is_empty() || skill_id.is_empty() {
        return None;
    }
    Some((app_id.to_string(), skill_id.to_string()))
}

/// If the declared schema requires a `requests` array and the LLM sent flat arguments (no
/// `requests` key), wrap the non-metadata keys into a single-element `requests` array. Keys
/// beginning with `_` are metadata (e.g. `_placeholder_embed_ids`) and stay at the top level.
pub fn normalize_arguments(schema: Option<&Value>, arguments: Value) -> Value {
    let Some(schema) = schema else { return arguments };
    let requires_requests_array = schema
        .get("properties")
        .and_then(|p| p.get("requests"))
        .map(|r| r.get("type").and_then(|t| t.as_str()) == Some("array"))
        .unwrap_or(false)
        && schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().any(|v| v.as_str() == Some("requests")))
            .unwrap_or(false);

    let Value::Object(map) = &arguments else {
        return arguments;
    };
    if map.contains_key("requests") || !requires_requests_array {
        return arguments;
    }

    let mut metadata = serde_json::Map::new();
    let mut flat = serde_json::Map::new();
    for (key, value) in map {
        if key.starts_with('_') {
            metadata.insert(key.clone(), value.clone());
        } else {
            flat.insert(key.clone(), value.clone());
        }
    }
    metadata.insert("requests".to_string(), Value::Array(vec![Value::Object(flat)]));
    Value::Object(metadata)
}

/// Overwrite every request's `id` field with its 1-based position, ignoring any LLM-supplied id
/// (placeholder correlation relies on this exact ordering downstream).
pub fn assign_request_ids(arguments: &mut Value) {
    if let Some(requests) = arguments.get_mut("requests").and_then(|r| r.as_array_mut()) {
        for (idx, request) in requests.iter_mut().enumerate() {
            if let Value::Object(map) = request {
                map.insert("id".to_string(), Value::String((idx + 1).to_string()));
            }
        }
    }
}

/// One schema-violation diagnostic. Logged, never fatal — this layer's role is early feedback;
/// the skill ultimately enforces its own constraints.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

/// Recursively walk `arguments` against `schema`, collecting `minimum`/`maximum` violations on
/// integer-typed properties.
pub fn validate_against_schema(schema: &Value, arguments: &Value) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    walk_schema(schema, arguments, "$", &mut warnings);
    warnings
}

fn walk_schema(schema: &Value, value: &Value, path: &str, warnings: &mut Vec<ValidationWarning>) {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return;
    };
    let Value::Object(value_map) = value else {
        return;
    };

    for (key, sub_schema) in properties {
        let Some(sub_value) = value_map.get(key) else {
            continue;
        };
        let field_path = format!("{}.{}", path, key);

        if sub_schema.get("type").and_then(|t| t.as_str()) == Some("integer") {
            if let Some(n) = sub_value.as_i64() {
                if let Some(min) = sub_schema.get("minimum").and_then(|m| m.as_i64()) {
                    if n < min {
                        warnings.push(ValidationWarning {
                            path: field_path.clone(),
                            message: format!("{} is below minimum {}", n, min),
                        });
                    }
                }
                if let Some(max) = sub_schema.get("maximum").and_then(|m| m.as_i64()) {
                    if n > max {
                        warnings.push(ValidationWarning {
                            path: field_path.clone(),
                            message: format!("{} is above maximum {}", n, max),
                        });
                    }
                }
            }
        }

        if sub_schema.get("type").and_then(|t| t.as_str()) == Some("array") {
            if let Some(item_schema) = sub_schema.get("items") {
                if let Some(items) = sub_value.as_array() {
                    for (idx, item) in items.iter().enumerate() {
                        walk_schema(item_schema, item, &format!("{}[{}]", field_path, idx), warnings);
                    }
                }
            }
        } else {
            walk_schema(sub_schema, sub_value, &field_path, warnings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_search_definitions() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "web-search".into(),
            description: "Search the web".into(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "required": ["requests"],
                "properties": {
                    "requests": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "max_results": {"type": "integer", "minimum": 1, "maximum": 10}
                            }
                        }
                    }
                }
            }),
        }]
    }

    #[test]
    fn resolves_both_hyphen_and_underscore_forms() {
        let resolver = ToolResolver::from_definitions(&web_search_definitions());
        assert_eq!(resolver.resolve("web-search").unwrap(), ("web".to_string(), "search".to_string()));
        assert_eq!(resolver.resolve("web_search").unwrap(), ("web".to_string(), "search".to_string()));
    }

    #[test]
    fn falls_back_to_splitting_unknown_names() {
        let resolver = ToolResolver::from_definitions(&web_search_definitions());
        let (app_id, skill_id) = resolver.resolve("reminder-set").unwrap();
        assert_eq!(app_id, "reminder");
        assert_eq!(skill_id, "set");
    }

    #[test]
    fn unresolvable_name_carries_available_tools() {
        let resolver = ToolResolver::from_definitions(&web_search_definitions());
        let err = resolver.resolve("nonsense_without_separator").unwrap_err();
        assert!(err.available_tools.contains(&"web-search".to_string()));
        let json = err.to_tool_response_json();
        assert!(json["error"].as_str().unwrap().contains("nonsense_without_separator"));
    }

    #[test]
    fn wraps_flat_arguments_into_requests_array() {
        let schema = web_search_definitions()[0].parameters_schema.clone();
        let flat = serde_json::json!({"max_results": 5, "_placeholder_embed_ids": ["e1"]});
        let normalized = normalize_arguments(Some(&schema), flat);
        let requests = normalized["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["max_results"], 5);
        assert_eq!(normalized["_placeholder_embed_ids"][0], "e1");
    }

    #[test]
    fn leaves_arguments_with_existing_requests_key_untouched() {
        let schema = web_search_definitions()[0].parameters_schema.clone();
        let already_wrapped = serde_json::json!({"requests": [{"max_results": 3}]});
        let normalized = normalize_arguments(Some(&schema), already_wrapped.clone());
        assert_eq!(normalized, already_wrapped);
    }

    #[test]
    fn assigns_sequential_request_ids_ignoring_llm_supplied_ones() {
        let mut args = serde_json::json!({"requests": [{"id": "99", "q": "a"}, {"id": "1", "q": "b"}]});
        assign_request_ids(&mut args);
        assert_eq!(args["requests"][0]["id"], "1");
        assert_eq!(args["requests"][1]["id"], "2");
    }

    #[test]
    fn validation_flags_out_of_range_integers_without_failing() {
        let schema = web_search_definitions()[0].parameters_schema.clone();
        let args = serde_json::json!({"requests": [{"max_results": 50}]});
        let warnings = validate_against_schema(&schema, &args);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("above maximum"));
    }
}
