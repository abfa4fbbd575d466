//! Parameter bundle produced by experiment matching.
//!
//! Every level of the scene graph can carry a parameter map; the match engine
//! merges them in precedence order (scene, then room, layer, group, version)
//! and downstream stages read their knobs through the typed accessors here.
//! Values follow JSON typing rules: integers are readable as floats.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentParams {
    values: Map<String, Value>,
}

impl ExperimentParams {
    pub fn new() -> Self {
        Self { values: Map::new() }
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Overlay `other` on top of this bundle, key by key.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(v) => v
                .as_i64()
                .or_else(|| v.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            None => default,
        }
    }

    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(v) => v.as_f64().unwrap_or(default),
            None => default,
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(v) => v.as_bool().unwrap_or(default),
            None => default,
        }
    }

    /// String values of a list-valued parameter; non-string elements are
    /// skipped.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ExperimentParams {
        match value {
            Value::Object(map) => ExperimentParams::from_map(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_typed_accessors() {
        let p = params(json!({
            "gamma": 0.5,
            "window": 7,
            "name": "home",
            "enabled": true,
        }));

        assert_eq!(p.get_float("gamma", 0.25), 0.5);
        assert_eq!(p.get_int("window", 5), 7);
        assert_eq!(p.get_string("name", ""), "home");
        assert!(p.get_bool("enabled", false));

        assert_eq!(p.get_float("missing", 0.25), 0.25);
        assert_eq!(p.get_int("missing", 5), 5);
        assert_eq!(p.get_string("missing", "x"), "x");
        assert!(!p.get_bool("missing", false));
    }

    #[test]
    fn test_numeric_widening() {
        let p = params(json!({"count": 3}));
        // Integers are readable as floats, but not the reverse.
        assert_eq!(p.get_float("count", 0.0), 3.0);

        let p = params(json!({"ratio": 0.5}));
        assert_eq!(p.get_int("ratio", -1), 0);
    }

    #[test]
    fn test_type_mismatch_yields_default() {
        let p = params(json!({"gamma": "not a number"}));
        assert_eq!(p.get_float("gamma", 0.25), 0.25);
        assert_eq!(p.get_int("gamma", 5), 5);
    }

    #[test]
    fn test_merge_precedence() {
        let mut p = params(json!({"a": 1, "b": 2}));
        let overlay = json!({"b": 20, "c": 30});
        if let Value::Object(map) = overlay {
            p.merge(&map);
        }
        assert_eq!(p.get_int("a", 0), 1);
        assert_eq!(p.get_int("b", 0), 20);
        assert_eq!(p.get_int("c", 0), 30);
    }

    #[test]
    fn test_string_list() {
        let p = params(json!({"ids": ["a", "b", 3]}));
        assert_eq!(p.get_string_list("ids"), vec!["a", "b"]);
        assert!(p.get_string_list("missing").is_empty());
    }
}
