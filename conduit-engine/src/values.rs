//! YAML value helpers
//!
//! Deep merging of values documents, dotted-path access, and conversion of
//! rendered variable lists into YAML.

use conduit_core::domain::environment::RenderVariableKV;
use serde_yaml::{Mapping, Value};

use crate::error::Result;

/// Parses a YAML document; blank input is an empty mapping
pub fn parse(yaml: &str) -> Result<Value> {
    if yaml.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    let value: Value = serde_yaml::from_str(yaml)?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

pub fn to_yaml(value: &Value) -> Result<String> {
    match value {
        Value::Mapping(map) if map.is_empty() => Ok(String::new()),
        _ => Ok(serde_yaml::to_string(value)?),
    }
}

/// Merges `overlay` into `base`; mappings merge key by key, anything else
/// is replaced
pub fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Deep-merges YAML documents left to right
pub fn merge_yaml(documents: &[&str]) -> Result<String> {
    let mut merged = Value::Mapping(Mapping::new());
    for document in documents {
        merge_into(&mut merged, parse(document)?);
    }
    to_yaml(&merged)
}

pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Sets a dotted path, creating intermediate mappings
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let mut current = value;
    for segment in path.split('.') {
        if !current.is_mapping() {
            *current = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = current else {
            return;
        };
        current = map
            .entry(Value::String(segment.to_string()))
            .or_insert(Value::Null);
    }
    *current = new_value;
}

/// Converts a JSON value into its YAML equivalent
pub fn json_to_yaml(value: &serde_json::Value) -> Value {
    serde_yaml::to_value(value).unwrap_or(Value::Null)
}

/// Renders variables as a YAML mapping; dotted keys become nested mappings
pub fn kvs_to_yaml(kvs: &[RenderVariableKV]) -> Result<String> {
    let mut root = Value::Mapping(Mapping::new());
    for kv in kvs {
        set_path(&mut root, &kv.key, json_to_yaml(&kv.value));
    }
    to_yaml(&root)
}

/// Plain-text form of a variable value for template substitution
pub fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_yaml_is_deep() {
        let base = "image:\n  repo: a\n  tag: v1\nreplicas: 1\n";
        let overlay = "image:\n  tag: v2\nextra: true\n";
        let merged = parse(&merge_yaml(&[base, overlay]).unwrap()).unwrap();

        assert_eq!(get_path(&merged, "image.repo").unwrap().as_str(), Some("a"));
        assert_eq!(get_path(&merged, "image.tag").unwrap().as_str(), Some("v2"));
        assert_eq!(get_path(&merged, "replicas").unwrap().as_u64(), Some(1));
        assert_eq!(get_path(&merged, "extra").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_merge_blank_documents() {
        assert_eq!(merge_yaml(&["", "  "]).unwrap(), "");
        let merged = merge_yaml(&["", "a: 1"]).unwrap();
        assert_eq!(merged.trim(), "a: 1");
    }

    #[test]
    fn test_set_path_creates_mappings() {
        let mut value = parse("a: scalar").unwrap();
        set_path(&mut value, "a.b.c", Value::from("x"));
        set_path(&mut value, "d", Value::from(2));
        assert_eq!(get_path(&value, "a.b.c").unwrap().as_str(), Some("x"));
        assert_eq!(get_path(&value, "d").unwrap().as_i64(), Some(2));
    }

    #[test]
    fn test_kvs_to_yaml() {
        let kvs = vec![
            RenderVariableKV::new("port", json!(8080)),
            RenderVariableKV::new("db.host", json!("mysql")),
        ];
        let value = parse(&kvs_to_yaml(&kvs).unwrap()).unwrap();
        assert_eq!(get_path(&value, "port").unwrap().as_i64(), Some(8080));
        assert_eq!(get_path(&value, "db.host").unwrap().as_str(), Some("mysql"));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("a")), "a");
        assert_eq!(display_value(&json!(3)), "3");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(null)), "");
    }
}
