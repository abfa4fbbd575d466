use std::collections::HashMap;

use ndarray::Array1;
use serde_json::{Map, Value};

use crate::experiment::ExperimentResult;

/// A candidate item flowing through the ranking pipeline. Items are owned by
/// the request that produced them; stages annotate properties and diagnostic
/// scores in place.
#[derive(Debug, Clone, Default)]
pub struct Item {
    pub id: String,
    pub item_type: String,
    /// Name of the retrieval source that produced this candidate.
    pub retrieve_id: String,
    pub score: f64,
    pub embedding: Option<Array1<f64>>,
    pub properties: HashMap<String, Value>,
    pub algo_scores: HashMap<String, f64>,
}

impl Item {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_score(id: &str, retrieve_id: &str, score: f64) -> Self {
        Self {
            id: id.to_string(),
            retrieve_id: retrieve_id.to_string(),
            score,
            ..Default::default()
        }
    }

    pub fn add_algo_score(&mut self, name: &str, score: f64) {
        self.algo_scores.insert(name.to_string(), score);
    }

    pub fn add_properties(&mut self, properties: &HashMap<String, Value>) {
        for (k, v) in properties {
            self.properties.insert(k.clone(), v.clone());
        }
    }

    pub fn string_property(&self, name: &str) -> Option<String> {
        self.properties
            .get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// The requesting user, hydrated with feature-store properties before
/// ranking.
#[derive(Debug, Clone, Default)]
pub struct User {
    pub uid: String,
    pub properties: HashMap<String, Value>,
}

impl User {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            properties: HashMap::new(),
        }
    }

    pub fn add_properties(&mut self, properties: &HashMap<String, Value>) {
        for (k, v) in properties {
            self.properties.insert(k.clone(), v.clone());
        }
    }

    pub fn string_property(&self, name: &str) -> Option<String> {
        if name == "id" || name == "uid" {
            return Some(self.uid.clone());
        }
        self.properties
            .get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Properties as a filter-parameter map, uid included.
    pub fn feature_map(&self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        map.insert("uid".to_string(), Value::String(self.uid.clone()));
        map
    }
}

/// Per-request state threaded through the pipeline. The experiment result is
/// resolved once, from a single store snapshot, when the context is built.
#[derive(Debug, Clone, Default)]
pub struct RecommendContext {
    pub request_id: String,
    pub scene: String,
    pub uid: String,
    pub size: usize,
    pub debug: bool,
    pub features: Map<String, Value>,
    pub experiment: ExperimentResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_properties() {
        let mut item = Item::with_score("i1", "vector", 0.8);
        let mut props = HashMap::new();
        props.insert("title".to_string(), json!("hello"));
        item.add_properties(&props);

        assert_eq!(item.string_property("title").as_deref(), Some("hello"));
        assert!(item.string_property("missing").is_none());

        item.add_algo_score("ssd_quality_score", 0.5);
        assert_eq!(item.algo_scores["ssd_quality_score"], 0.5);
    }

    #[test]
    fn test_user_id_property() {
        let user = User::new("u1");
        assert_eq!(user.string_property("id").as_deref(), Some("u1"));
        assert_eq!(user.string_property("uid").as_deref(), Some("u1"));
        assert!(user.string_property("city").is_none());
    }

    #[test]
    fn test_user_feature_map() {
        let mut user = User::new("u1");
        let mut props = HashMap::new();
        props.insert("city".to_string(), json!("sf"));
        user.add_properties(&props);

        let map = user.feature_map();
        assert_eq!(map.get("uid"), Some(&json!("u1")));
        assert_eq!(map.get("city"), Some(&json!("sf")));
    }
}
