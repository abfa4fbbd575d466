//! Match engine: resolves `(scene, uid, filter params)` against a snapshot
//! into per-layer experiment assignments and a merged parameter bundle.
//!
//! Selection precedence inside a room is debug user, then filter, then
//! bucket. Layers are orthogonal: each layer assigns the user independently,
//! and a failure inside one layer never affects the others.

use serde_json::{Map, Value};
use tracing::warn;

use super::bucket::bucket_of;
use super::filter::FilterExpr;
use super::model::{CrowdTargetType, ExperimentGroup, ExperimentRoom, ExperimentVersion, Scene};
use super::params::ExperimentParams;
use super::store::Snapshot;

/// The winning path through one layer.
#[derive(Debug, Clone, Default)]
pub struct LayerMatch {
    pub layer_id: i64,
    pub layer_name: String,
    pub group_id: i64,
    pub group_name: String,
    pub experiment_id: i64,
    pub experiment_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExperimentResult {
    pub scene_name: String,
    pub scene_id: i64,
    pub room_id: Option<i64>,
    pub layers: Vec<LayerMatch>,
    params: ExperimentParams,
}

impl ExperimentResult {
    pub fn empty(scene_name: &str) -> Self {
        Self {
            scene_name: scene_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_params(scene_name: &str, params: ExperimentParams) -> Self {
        Self {
            scene_name: scene_name.to_string(),
            params,
            ..Default::default()
        }
    }

    pub fn params(&self) -> &ExperimentParams {
        &self.params
    }

    /// Compact one-line summary for request logs.
    pub fn info(&self) -> String {
        let mut parts = vec![format!("scene={}", self.scene_name)];
        if let Some(room_id) = self.room_id {
            parts.push(format!("room={}", room_id));
        }
        for layer in &self.layers {
            parts.push(format!(
                "layer={}:group={}:exp={}",
                layer.layer_id, layer.group_id, layer.experiment_id
            ));
        }
        parts.join("\t")
    }
}

/// Resolve an experiment assignment against one snapshot.
pub fn match_experiment(
    snapshot: &Snapshot,
    scene_name: &str,
    uid: &str,
    filter_params: &Map<String, Value>,
) -> ExperimentResult {
    let scene = match snapshot.scene(scene_name) {
        Some(scene) => scene,
        None => return ExperimentResult::empty(scene_name),
    };

    let mut features = filter_params.clone();
    features.insert("__uid__".to_string(), Value::String(uid.to_string()));
    features.insert("__scene__".to_string(), Value::String(scene_name.to_string()));

    let mut result = ExperimentResult {
        scene_name: scene_name.to_string(),
        scene_id: scene.scene_id,
        ..Default::default()
    };
    result.params.merge(&scene.config);

    let room = match select_room(scene, uid, &features) {
        Some(room) => room,
        None => return result,
    };
    result.room_id = Some(room.room_id);
    result.params.merge(&room.config);

    for layer in &room.layers {
        result.params.merge(&layer.config);
        let group = match select_group(layer.groups.as_slice(), room, uid, &features) {
            Some(group) => group,
            None => continue,
        };
        result.params.merge(&group.config);

        let version = match select_version(group, uid) {
            Some(version) => version,
            None => continue,
        };
        result.params.merge(&version.config);

        result.layers.push(LayerMatch {
            layer_id: layer.layer_id,
            layer_name: layer.name.clone(),
            group_id: group.group_id,
            group_name: group.name.clone(),
            experiment_id: version.experiment_id,
            experiment_name: version.name.clone(),
        });
    }

    result
}

fn select_room<'a>(
    scene: &'a Scene,
    uid: &str,
    features: &Map<String, Value>,
) -> Option<&'a ExperimentRoom> {
    for room in &scene.rooms {
        if room.debug_users.iter().any(|u| u == uid) {
            return Some(room);
        }
        if !room.filter.is_empty() {
            if eval_filter(&room.filter, features, room.room_id) {
                return Some(room);
            }
            continue;
        }
        let bucket = bucket_of(uid, room.room_id, room.bucket_count);
        if room.buckets.contains(bucket) {
            return Some(room);
        }
    }
    scene.default_room()
}

fn select_group<'a>(
    groups: &'a [ExperimentGroup],
    room: &ExperimentRoom,
    uid: &str,
    features: &Map<String, Value>,
) -> Option<&'a ExperimentGroup> {
    groups.iter().find(|group| match group.crowd_target_type {
        CrowdTargetType::All => true,
        CrowdTargetType::Filter => {
            group.debug_users.iter().any(|u| u == uid)
                || (!group.filter.is_empty()
                    && eval_filter(&group.filter, features, group.group_id))
        }
        CrowdTargetType::Random => {
            let bucket = bucket_of(uid, group.group_id, room.bucket_count);
            group.holding_buckets.contains(bucket)
        }
    })
}

fn select_version<'a>(group: &'a ExperimentGroup, uid: &str) -> Option<&'a ExperimentVersion> {
    let total_flow: u32 = group.versions.iter().map(|v| v.flow).sum();
    if total_flow == 0 {
        return None;
    }
    let bucket = bucket_of(uid, group.group_id, total_flow);
    let mut cumulative = 0u32;
    for version in &group.versions {
        cumulative += version.flow;
        if bucket < cumulative {
            return Some(version);
        }
    }
    None
}

fn eval_filter(raw: &str, features: &Map<String, Value>, entity_id: i64) -> bool {
    match FilterExpr::parse(raw) {
        Ok(expr) => expr.evaluate(features),
        Err(e) => {
            warn!(entity_id, error = %e, "invalid filter expression, treating as no match");
            false
        }
    }
}
