//! In-memory experiment store with atomic snapshot publication.
//!
//! A refresh builds a complete `Snapshot` off to the side and publishes it
//! with a single atomic pointer swap. Readers take one snapshot per request
//! and keep it for the request's lifetime; a snapshot taken before a publish
//! stays fully consistent until its last reader drops it. Reads never lock.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::model::Scene;

#[derive(Debug, Default)]
pub struct Snapshot {
    scenes: HashMap<String, Scene>,
}

impl Snapshot {
    pub fn new(scenes: Vec<Scene>) -> Self {
        let scenes = scenes
            .into_iter()
            .map(|scene| (scene.scene_name.clone(), scene))
            .collect();
        Self { scenes }
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes.get(name)
    }

    pub fn iter_scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.values()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

pub struct ExperimentStore {
    current: ArcSwap<Snapshot>,
}

impl ExperimentStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Replace the published snapshot. Readers holding the previous one are
    /// unaffected.
    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

impl Default for ExperimentStore {
    fn default() -> Self {
        Self::new()
    }
}
