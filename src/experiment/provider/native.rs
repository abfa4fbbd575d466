//! Native provider: the upstream already speaks our scene schema, so a
//! refresh is a pull with no translation.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::experiment::model::Scene;

use super::ExperimentProvider;

/// Where the native provider gets its scenes from.
#[async_trait]
pub trait SceneSource: Send + Sync {
    async fn list_scenes(&self) -> Result<Vec<Scene>>;
}

pub struct NativeProvider {
    source: Arc<dyn SceneSource>,
}

impl NativeProvider {
    pub fn new(source: Arc<dyn SceneSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ExperimentProvider for NativeProvider {
    fn name(&self) -> &'static str {
        "pairec"
    }

    async fn fetch_scenes(&self) -> Result<Vec<Scene>> {
        self.source.list_scenes().await
    }
}

/// Fixed in-memory scene set. Used in tests and for locally pinned
/// configurations.
pub struct StaticSceneSource {
    scenes: Vec<Scene>,
}

impl StaticSceneSource {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }
}

#[async_trait]
impl SceneSource for StaticSceneSource {
    async fn list_scenes(&self) -> Result<Vec<Scene>> {
        Ok(self.scenes.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ListScenesResponse {
    #[serde(default)]
    data: Vec<Scene>,
}

/// Scene source backed by the experiment configuration server.
pub struct HttpSceneSource {
    client: Client,
    base_url: String,
    environment: String,
}

impl HttpSceneSource {
    pub fn new(base_url: &str, environment: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            environment: environment.to_string(),
        }
    }
}

#[async_trait]
impl SceneSource for HttpSceneSource {
    async fn list_scenes(&self) -> Result<Vec<Scene>> {
        let url = format!(
            "{}/api/v1/scenes?environment={}",
            self.base_url, self.environment
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "scene list request failed with status {}",
                response.status()
            )));
        }
        let body: ListScenesResponse = response.json().await?;
        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_round_trip() {
        let scene = Scene {
            scene_id: 7,
            scene_name: "home".to_string(),
            ..Default::default()
        };
        let provider = NativeProvider::new(Arc::new(StaticSceneSource::new(vec![scene])));
        let scenes = provider.fetch_scenes().await.unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].scene_name, "home");
    }
}
