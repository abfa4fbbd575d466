//! Foreign (PAI) provider: pulls the provider-specific project graph and
//! translates it into the native scene schema.
//!
//! Only projects named with the `pairec_` prefix are served; the prefix is
//! stripped to form the scene name. Each domain becomes a room, each domain
//! layer a layer, each experiment an experiment group and each experiment
//! version a version. The provider's config format (an array of typed
//! key/value entries) is folded into a plain parameter object.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::experiment::model::{
    parse_debug_users, BucketSet, BucketType, CrowdTargetType, ExperimentGroup,
    ExperimentRoom, ExperimentVersion, Layer, Scene, VersionType,
};

use super::ExperimentProvider;

const SCENE_PROJECT_PREFIX: &str = "pairec_";

/// Project graph as exported by the PAI experiment platform.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub project_name: String,
    #[serde(default)]
    pub project_info: String,
    #[serde(default)]
    pub default_domain_id: i64,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Domain {
    pub domain_id: i64,
    pub name: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub debug_users: String,
    #[serde(default)]
    pub buckets: String,
    #[serde(default)]
    pub bucket_type: u32,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub layers: Vec<ProjectLayer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectLayer {
    pub layer_id: i64,
    pub name: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub experiments: Vec<ProjectExperiment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectExperiment {
    pub experiment_id: i64,
    pub name: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub debug_users: String,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub buckets: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub status: u32,
    #[serde(default)]
    pub versions: Vec<ProjectExperimentVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectExperimentVersion {
    pub version_id: i64,
    pub name: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub version_type: u32,
    #[serde(default)]
    pub flow: u32,
    #[serde(default)]
    pub buckets: String,
    #[serde(default)]
    pub debug_users: String,
    #[serde(default)]
    pub config: String,
}

/// Where the foreign provider gets its project graph from. This replaces the
/// SDK-internal project cache with an explicit export the translator
/// consumes.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>>;
}

pub struct PaiProvider {
    source: Arc<dyn ProjectSource>,
}

impl PaiProvider {
    pub fn new(source: Arc<dyn ProjectSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ExperimentProvider for PaiProvider {
    fn name(&self) -> &'static str {
        "pai"
    }

    async fn fetch_scenes(&self) -> Result<Vec<Scene>> {
        let projects = self.source.list_projects().await?;
        Ok(projects.iter().filter_map(translate_project).collect())
    }
}

/// Translate one project into a scene. Projects without the scene prefix are
/// not served and yield `None`.
pub fn translate_project(project: &Project) -> Option<Scene> {
    let scene_name = project.project_name.strip_prefix(SCENE_PROJECT_PREFIX)?;

    let mut scene = Scene {
        scene_id: project.project_id,
        scene_name: scene_name.to_string(),
        scene_info: project.project_info.clone(),
        config: Map::new(),
        rooms: Vec::new(),
    };

    // The default domain leads the room order so that room fallback always
    // finds it in a stable position.
    let (default_domains, others): (Vec<&Domain>, Vec<&Domain>) = project
        .domains
        .iter()
        .partition(|d| d.domain_id == project.default_domain_id);
    for domain in default_domains.into_iter().chain(others) {
        let is_default = domain.domain_id == project.default_domain_id;
        match convert_domain(domain, project.project_id, is_default) {
            Ok(room) => scene.rooms.push(room),
            Err(e) => {
                warn!(
                    domain_id = domain.domain_id,
                    error = %e,
                    "skipping domain with invalid configuration"
                );
            }
        }
    }

    Some(scene)
}

fn convert_domain(domain: &Domain, scene_id: i64, is_default: bool) -> Result<ExperimentRoom> {
    let mut room = ExperimentRoom {
        room_id: domain.domain_id,
        scene_id,
        name: domain.name.clone(),
        info: domain.info.clone(),
        bucket_count: 100,
        bucket_type: convert_bucket_type(domain.bucket_type),
        buckets: BucketSet::parse(&domain.buckets)?,
        filter: domain.filter.clone(),
        debug_users: parse_debug_users(&domain.debug_users),
        environment: 1,
        room_type: 1,
        status: 1,
        is_default,
        config: Map::new(),
        layers: Vec::new(),
    };
    for layer in &domain.layers {
        room.layers.push(convert_layer(layer, room.room_id, scene_id)?);
    }
    Ok(room)
}

fn convert_bucket_type(raw: u32) -> BucketType {
    match raw {
        1 => BucketType::DeviceId,
        2 => BucketType::Custom,
        _ => BucketType::UserId,
    }
}

fn convert_layer(layer: &ProjectLayer, room_id: i64, scene_id: i64) -> Result<Layer> {
    let mut converted = Layer {
        layer_id: layer.layer_id,
        room_id,
        scene_id,
        name: layer.name.clone(),
        info: layer.info.clone(),
        config: Map::new(),
        groups: Vec::new(),
    };
    for experiment in &layer.experiments {
        converted
            .groups
            .push(convert_experiment(experiment, converted.layer_id, room_id, scene_id)?);
    }
    Ok(converted)
}

/// First rule wins: debug users force filter targeting, then an explicit
/// filter, then bucket ranges select random targeting, otherwise the group
/// admits everyone.
fn determine_crowd_target_type(experiment: &ProjectExperiment) -> CrowdTargetType {
    if !experiment.debug_users.is_empty() {
        return CrowdTargetType::Filter;
    }
    if !experiment.filter.is_empty() {
        return CrowdTargetType::Filter;
    }
    if !experiment.buckets.is_empty() {
        return CrowdTargetType::Random;
    }
    CrowdTargetType::All
}

fn convert_experiment(
    experiment: &ProjectExperiment,
    layer_id: i64,
    room_id: i64,
    scene_id: i64,
) -> Result<ExperimentGroup> {
    let buckets = BucketSet::parse(&experiment.buckets)?;
    let mut group = ExperimentGroup {
        group_id: experiment.experiment_id,
        layer_id,
        room_id,
        scene_id,
        name: experiment.name.clone(),
        info: experiment.info.clone(),
        crowd_target_type: determine_crowd_target_type(experiment),
        debug_users: parse_debug_users(&experiment.debug_users),
        filter: experiment.filter.clone(),
        reserve_buckets: buckets.clone(),
        holding_buckets: buckets,
        status: experiment.status,
        owner: experiment.owner.clone(),
        config: Map::new(),
        versions: Vec::new(),
    };
    for version in &experiment.versions {
        group
            .versions
            .push(convert_version(version, group.group_id, layer_id, room_id, scene_id)?);
    }
    Ok(group)
}

fn convert_version(
    version: &ProjectExperimentVersion,
    group_id: i64,
    layer_id: i64,
    room_id: i64,
    scene_id: i64,
) -> Result<ExperimentVersion> {
    Ok(ExperimentVersion {
        experiment_id: version.version_id,
        group_id,
        layer_id,
        room_id,
        scene_id,
        name: version.name.clone(),
        version_type: VersionType::from_u32(version.version_type),
        flow: version.flow,
        buckets: BucketSet::parse(&version.buckets)?,
        debug_users: parse_debug_users(&version.debug_users),
        config: convert_config(&version.config),
        status: 1,
    })
}

#[derive(Debug, Deserialize)]
struct ConfigItem {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(rename = "type", default)]
    _value_type: String,
}

/// Fold the provider's `[{"key": k, "value": s, "type": t}, ...]` config into
/// a parameter object. Each value is parsed as JSON; values that do not
/// parse are kept as raw strings. An empty or malformed config becomes `{}`.
pub fn convert_config(raw: &str) -> Map<String, Value> {
    if raw.is_empty() {
        return Map::new();
    }
    let items: Vec<ConfigItem> = match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "failed to parse experiment config, dropping it");
            return Map::new();
        }
    };
    let mut config = Map::new();
    for item in items {
        let value = serde_json::from_str(&item.value)
            .unwrap_or_else(|_| Value::String(item.value.clone()));
        config.insert(item.key, value);
    }
    config
}

#[derive(Debug, Deserialize)]
struct ListProjectsResponse {
    #[serde(default)]
    data: Vec<Project>,
}

/// Project source that polls the provider's REST endpoints directly instead
/// of reaching into an SDK-internal cache.
pub struct HttpProjectSource {
    client: Client,
    base_url: String,
    region: String,
    access_key: String,
    access_secret: String,
}

impl HttpProjectSource {
    pub fn new(base_url: &str, region: &str, access_key: &str, access_secret: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            region: region.to_string(),
            access_key: access_key.to_string(),
            access_secret: access_secret.to_string(),
        }
    }
}

#[async_trait]
impl ProjectSource for HttpProjectSource {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let url = format!("{}/api/v1/projects", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-pai-region", &self.region)
            .header("x-pai-access-key", &self.access_key)
            .header("x-pai-access-secret", &self.access_secret)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "project list request failed with status {}",
                response.status()
            )));
        }
        let body: ListProjectsResponse = response.json().await?;
        Ok(body.data)
    }
}

/// Fixed in-memory project graph for tests.
pub struct StaticProjectSource {
    projects: Vec<Project>,
}

impl StaticProjectSource {
    pub fn new(projects: Vec<Project>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl ProjectSource for StaticProjectSource {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.clone())
    }
}
