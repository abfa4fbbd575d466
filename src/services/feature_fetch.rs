//! Feature hydration from an external feature store.
//!
//! The store itself is an external collaborator behind `FeatureStoreClient`;
//! the DAO derives lookup keys from a `scope:property` feature key, fetches
//! by entity or by feature view, and joins results back onto user or item
//! properties. Fetch failures are logged and swallowed so the request
//! continues with whatever properties it already had.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::error::Result;
use crate::models::{Item, RecommendContext, User};

/// External feature-store surface. One method per fetch style.
#[async_trait]
pub trait FeatureStoreClient: Send + Sync {
    /// Fetch by entity: one row of features per join key value.
    async fn get_online_features_with_entity(
        &self,
        join_id: &str,
        keys: Vec<Value>,
        entity: &str,
    ) -> Result<Vec<HashMap<String, Value>>>;

    /// Fetch from a feature view, selecting the named fields (or all fields
    /// when empty).
    async fn get_online_features_with_view(
        &self,
        view: &str,
        keys: Vec<Value>,
        select_fields: &[String],
    ) -> Result<Vec<HashMap<String, Value>>>;
}

#[derive(Debug, Clone, Default)]
pub struct FeatureFetchConfig {
    /// `scope:property` where scope is `user` or `item` and property names
    /// the key field, or the literal `id`.
    pub feature_key: String,
    pub entity_name: String,
    pub entity_join_id: String,
    /// When set, fetch goes through this feature view instead of the entity.
    pub view_name: String,
    pub user_select_fields: Vec<String>,
    pub item_select_fields: Vec<String>,
}

pub struct FeatureFetchDao {
    client: Arc<dyn FeatureStoreClient>,
    cfg: FeatureFetchConfig,
}

impl FeatureFetchDao {
    pub fn new(client: Arc<dyn FeatureStoreClient>, cfg: FeatureFetchConfig) -> Self {
        Self { client, cfg }
    }

    fn key_property(&self, ctx: &RecommendContext) -> Option<String> {
        match self.cfg.feature_key.split_once(':') {
            Some((_, property)) => Some(property.to_string()),
            None => {
                error!(
                    request_id = %ctx.request_id,
                    feature_key = %self.cfg.feature_key,
                    "malformed feature key, expected scope:property"
                );
                None
            }
        }
    }

    /// Hydrate the user with feature-store properties. Never fails the
    /// request.
    pub async fn fetch_user_features(&self, user: &mut User, ctx: &RecommendContext) {
        let property = match self.key_property(ctx) {
            Some(p) => p,
            None => return,
        };
        let key = match user.string_property(&property) {
            Some(k) if !k.is_empty() => k,
            _ => {
                error!(
                    request_id = %ctx.request_id,
                    uid = %user.uid,
                    property = %property,
                    "user key property not found"
                );
                return;
            }
        };

        let rows = if self.cfg.view_name.is_empty() {
            self.client
                .get_online_features_with_entity(
                    &self.cfg.entity_join_id,
                    vec![Value::String(key)],
                    &self.cfg.entity_name,
                )
                .await
        } else {
            self.client
                .get_online_features_with_view(
                    &self.cfg.view_name,
                    vec![Value::String(key)],
                    &self.cfg.user_select_fields,
                )
                .await
        };

        match rows {
            Ok(rows) => match rows.into_iter().next() {
                Some(row) => user.add_properties(&row),
                None => warn!(request_id = %ctx.request_id, "user feature fetch returned no rows"),
            },
            Err(e) => {
                error!(request_id = %ctx.request_id, error = %e, "user feature fetch failed");
            }
        }
    }

    /// Hydrate every item with feature-store properties, one batched fetch
    /// for the whole candidate set. Never fails the request.
    pub async fn fetch_item_features(&self, items: &mut [Item], ctx: &RecommendContext) {
        if items.is_empty() {
            return;
        }
        let property = match self.key_property(ctx) {
            Some(p) => p,
            None => return,
        };
        let use_item_id = self.cfg.feature_key == "item:id" || property == "id";

        let mut key_to_indexes: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            let key = if use_item_id {
                Some(item.id.clone())
            } else {
                item.string_property(&property)
            };
            if let Some(key) = key {
                key_to_indexes.entry(key).or_default().push(index);
            }
        }
        if key_to_indexes.is_empty() {
            warn!(request_id = %ctx.request_id, "no item produced a feature key");
            return;
        }
        let keys: Vec<Value> = key_to_indexes
            .keys()
            .map(|k| Value::String(k.clone()))
            .collect();

        let rows = if self.cfg.view_name.is_empty() {
            self.client
                .get_online_features_with_entity(
                    &self.cfg.entity_join_id,
                    keys,
                    &self.cfg.entity_name,
                )
                .await
        } else {
            self.client
                .get_online_features_with_view(
                    &self.cfg.view_name,
                    keys,
                    &self.cfg.item_select_fields,
                )
                .await
        };

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                error!(request_id = %ctx.request_id, error = %e, "item feature fetch failed");
                return;
            }
        };

        for row in rows {
            let join_value = row
                .get(&self.cfg.entity_join_id)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if let Some(join_value) = join_value {
                if let Some(indexes) = key_to_indexes.get(&join_value) {
                    for &index in indexes {
                        items[index].add_properties(&row);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use serde_json::json;

    struct FakeStore {
        rows: Vec<HashMap<String, Value>>,
        fail: bool,
    }

    #[async_trait]
    impl FeatureStoreClient for FakeStore {
        async fn get_online_features_with_entity(
            &self,
            _join_id: &str,
            _keys: Vec<Value>,
            _entity: &str,
        ) -> Result<Vec<HashMap<String, Value>>> {
            if self.fail {
                return Err(AppError::Fetch("store down".to_string()));
            }
            Ok(self.rows.clone())
        }

        async fn get_online_features_with_view(
            &self,
            _view: &str,
            _keys: Vec<Value>,
            _select_fields: &[String],
        ) -> Result<Vec<HashMap<String, Value>>> {
            self.get_online_features_with_entity("", vec![], "").await
        }
    }

    fn row(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn item_dao(rows: Vec<HashMap<String, Value>>, fail: bool) -> FeatureFetchDao {
        FeatureFetchDao::new(
            Arc::new(FakeStore { rows, fail }),
            FeatureFetchConfig {
                feature_key: "item:id".to_string(),
                entity_name: "item".to_string(),
                entity_join_id: "item_id".to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_user_features_joined_onto_properties() {
        let dao = FeatureFetchDao::new(
            Arc::new(FakeStore {
                rows: vec![row(vec![("city", json!("sf")), ("age", json!(30))])],
                fail: false,
            }),
            FeatureFetchConfig {
                feature_key: "user:id".to_string(),
                entity_name: "user".to_string(),
                entity_join_id: "user_id".to_string(),
                ..Default::default()
            },
        );

        let mut user = User::new("u1");
        dao.fetch_user_features(&mut user, &RecommendContext::default())
            .await;
        assert_eq!(user.string_property("city").as_deref(), Some("sf"));
    }

    #[tokio::test]
    async fn test_item_features_joined_by_key() {
        let dao = item_dao(
            vec![
                row(vec![("item_id", json!("a")), ("category", json!("sports"))]),
                row(vec![("item_id", json!("b")), ("category", json!("news"))]),
            ],
            false,
        );

        let mut items = vec![Item::new("a"), Item::new("b"), Item::new("c")];
        dao.fetch_item_features(&mut items, &RecommendContext::default())
            .await;

        assert_eq!(items[0].string_property("category").as_deref(), Some("sports"));
        assert_eq!(items[1].string_property("category").as_deref(), Some("news"));
        assert!(items[2].string_property("category").is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_prior_properties() {
        let dao = item_dao(vec![], true);

        let mut items = vec![Item::new("a")];
        items[0]
            .properties
            .insert("category".to_string(), json!("prior"));
        dao.fetch_item_features(&mut items, &RecommendContext::default())
            .await;

        assert_eq!(items[0].string_property("category").as_deref(), Some("prior"));
    }

    #[tokio::test]
    async fn test_malformed_feature_key_is_swallowed() {
        let dao = FeatureFetchDao::new(
            Arc::new(FakeStore { rows: vec![], fail: false }),
            FeatureFetchConfig {
                feature_key: "no-colon".to_string(),
                ..Default::default()
            },
        );
        let mut user = User::new("u1");
        dao.fetch_user_features(&mut user, &RecommendContext::default())
            .await;
        assert!(user.properties.is_empty());
    }

    #[tokio::test]
    async fn test_items_sharing_a_key_all_receive_features() {
        let dao = FeatureFetchDao::new(
            Arc::new(FakeStore {
                rows: vec![row(vec![("shop_id", json!("s1")), ("rating", json!(4.5))])],
                fail: false,
            }),
            FeatureFetchConfig {
                feature_key: "item:shop_id".to_string(),
                entity_name: "shop".to_string(),
                entity_join_id: "shop_id".to_string(),
                ..Default::default()
            },
        );

        let mut items = vec![Item::new("a"), Item::new("b")];
        for item in items.iter_mut() {
            item.properties.insert("shop_id".to_string(), json!("s1"));
        }
        dao.fetch_item_features(&mut items, &RecommendContext::default())
            .await;

        assert_eq!(items[0].properties["rating"], json!(4.5));
        assert_eq!(items[1].properties["rating"], json!(4.5));
    }
}
