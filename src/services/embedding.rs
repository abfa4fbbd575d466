//! Item embedding loading.
//!
//! The reranker pulls embeddings through the `EmbeddingSource` trait; the
//! production implementation reads a text-encoded vector column from a SQL
//! table whose name is `<base><suffix>`, where the suffix comes from the
//! experiment parameter bundle.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::error::{AppError, Result};

/// Loader keyed by item id. Returns a vector per found id; absent ids are
/// simply missing from the map.
#[async_trait]
pub trait EmbeddingSource: Send + Sync {
    async fn fetch(&self, table_suffix: &str, ids: &[String])
        -> Result<HashMap<String, Vec<f64>>>;
}

pub struct SqlEmbeddingSource {
    pool: PgPool,
    table_name: String,
    key_field: String,
    embedding_field: String,
    separator: String,
}

impl SqlEmbeddingSource {
    pub fn new(
        pool: PgPool,
        table_name: &str,
        key_field: &str,
        embedding_field: &str,
        separator: &str,
    ) -> Self {
        Self {
            pool,
            table_name: table_name.to_string(),
            key_field: key_field.to_string(),
            embedding_field: embedding_field.to_string(),
            separator: if separator.is_empty() {
                ",".to_string()
            } else {
                separator.to_string()
            },
        }
    }

    fn parse_vector(&self, raw: &str) -> Vec<f64> {
        raw.trim_matches(|c| c == '{' || c == '}')
            .split(self.separator.as_str())
            .map(|piece| match piece.trim().parse::<f64>() {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "failed to parse embedding component");
                    0.0
                }
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingSource for SqlEmbeddingSource {
    async fn fetch(
        &self,
        table_suffix: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f64>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let table = format!("{}{}", self.table_name, table_suffix);
        let query = format!(
            "SELECT {}, {} FROM {} WHERE {} = ANY($1)",
            self.key_field, self.embedding_field, table, self.key_field
        );

        let rows = sqlx::query(&query)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Fetch(format!("embedding query failed: {}", e)))?;

        let mut vectors = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: Option<String> = row.try_get(0)?;
            let raw: Option<String> = row.try_get(1)?;
            if let (Some(id), Some(raw)) = (id, raw) {
                vectors.insert(id, self.parse_vector(&raw));
            }
        }
        Ok(vectors)
    }
}

/// Map-backed embedding source for tests and local runs.
#[derive(Default)]
pub struct StaticEmbeddingSource {
    vectors: HashMap<String, Vec<f64>>,
}

impl StaticEmbeddingSource {
    pub fn new(vectors: HashMap<String, Vec<f64>>) -> Self {
        Self { vectors }
    }
}

#[async_trait]
impl EmbeddingSource for StaticEmbeddingSource {
    async fn fetch(
        &self,
        _table_suffix: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f64>>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.vectors.get(id).map(|v| (id.clone(), v.clone())))
            .collect())
    }
}
