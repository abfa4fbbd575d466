//! Experiment providers and the refresh-owning service.
//!
//! A provider pulls the full scene graph from its upstream on every refresh;
//! the service translates a successful pull into a new store snapshot. A
//! failed pull leaves the previous snapshot in place, so request handlers
//! never observe a partial or missing configuration.

pub mod native;
pub mod pai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::config::AbTestConfig;
use crate::error::Result;

use super::matcher::{match_experiment, ExperimentResult};
use super::model::Scene;
use super::store::{ExperimentStore, Snapshot};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Upstream source of the scene graph.
#[async_trait]
pub trait ExperimentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pull and (if needed) translate the complete scene graph.
    async fn fetch_scenes(&self) -> Result<Vec<Scene>>;
}

/// Which provider backs the experiment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Pairec,
    Pai,
}

impl ProviderKind {
    /// Provider selection: an explicit `ABTEST_PROVIDER` wins, otherwise the
    /// first provider whose environment variable is set. `None` means the
    /// service runs without experiments.
    pub fn detect(cfg: &AbTestConfig) -> Option<Self> {
        match cfg.provider.as_deref() {
            Some("pairec") => return Some(ProviderKind::Pairec),
            Some("pai") => return Some(ProviderKind::Pai),
            _ => {}
        }
        if cfg.pairec_environment.is_some() {
            Some(ProviderKind::Pairec)
        } else if cfg.paiabtest_environment.is_some() {
            Some(ProviderKind::Pai)
        } else {
            None
        }
    }
}

/// Owns the store and the provider; constructed once at startup and shared
/// through request state.
pub struct ExperimentService {
    store: ExperimentStore,
    provider: Arc<dyn ExperimentProvider>,
    refresh_interval: Duration,
}

impl ExperimentService {
    pub fn new(provider: Arc<dyn ExperimentProvider>, refresh_interval: Duration) -> Self {
        Self {
            store: ExperimentStore::new(),
            provider,
            refresh_interval,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    /// Pull from the provider and publish a fresh snapshot. Any error leaves
    /// the current snapshot untouched.
    pub async fn refresh(&self) -> Result<()> {
        let scenes = self.provider.fetch_scenes().await?;
        let count = scenes.len();
        self.store.publish(Snapshot::new(scenes));
        info!(
            provider = self.provider.name(),
            scenes = count,
            "experiment snapshot published"
        );
        Ok(())
    }

    /// Resolve one request against the current snapshot.
    pub fn match_experiment(
        &self,
        scene_name: &str,
        uid: &str,
        filter_params: &Map<String, Value>,
    ) -> ExperimentResult {
        let snapshot = self.snapshot();
        match_experiment(&snapshot, scene_name, uid, filter_params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::provider::native::{NativeProvider, StaticSceneSource};
    use crate::error::AppError;

    struct FailingProvider;

    #[async_trait]
    impl ExperimentProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn fetch_scenes(&self) -> Result<Vec<Scene>> {
            Err(AppError::Provider("upstream down".to_string()))
        }
    }

    fn scene(name: &str) -> Scene {
        Scene {
            scene_id: 1,
            scene_name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_detection() {
        let mut cfg = AbTestConfig::default();
        assert_eq!(ProviderKind::detect(&cfg), None);

        cfg.paiabtest_environment = Some("product".to_string());
        assert_eq!(ProviderKind::detect(&cfg), Some(ProviderKind::Pai));

        // The native environment takes precedence when both are set.
        cfg.pairec_environment = Some("product".to_string());
        assert_eq!(ProviderKind::detect(&cfg), Some(ProviderKind::Pairec));

        cfg.provider = Some("pai".to_string());
        assert_eq!(ProviderKind::detect(&cfg), Some(ProviderKind::Pai));
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let source = StaticSceneSource::new(vec![scene("home")]);
        let provider = Arc::new(NativeProvider::new(Arc::new(source)));
        let service = ExperimentService::new(provider, DEFAULT_REFRESH_INTERVAL);

        assert!(service.snapshot().is_empty());
        service.refresh().await.unwrap();
        assert!(service.snapshot().scene("home").is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let source = StaticSceneSource::new(vec![scene("home")]);
        let provider = Arc::new(NativeProvider::new(Arc::new(source)));
        let service = ExperimentService::new(provider, DEFAULT_REFRESH_INTERVAL);
        service.refresh().await.unwrap();

        let broken = ExperimentService {
            store: ExperimentStore::new(),
            provider: Arc::new(FailingProvider),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        };
        broken.store.publish(Snapshot::new(vec![scene("home")]));

        assert!(broken.refresh().await.is_err());
        assert!(broken.snapshot().scene("home").is_some());
    }
}
