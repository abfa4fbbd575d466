//! Scene graph for experiment routing.
//!
//! A `Scene` owns rooms, a room owns layers, a layer owns experiment groups
//! and a group owns experiment versions. Ownership only points downward;
//! children carry the ids of their ancestors so no back-references are
//! needed. A snapshot of this graph is immutable once published.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Entity the bucket hash is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BucketType {
    #[default]
    UserId,
    DeviceId,
    Custom,
}

/// How an experiment group decides membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CrowdTargetType {
    #[default]
    All,
    Random,
    Filter,
}

/// Control/treatment marker on an experiment version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionType {
    Control = 1,
    Treatment = 2,
}

impl VersionType {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            2 => VersionType::Treatment,
            _ => VersionType::Control,
        }
    }
}

/// A set of bucket ranges parsed from a serialized assignment such as
/// `"0-49,70,90-99"`. Ranges are inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSet {
    ranges: Vec<(u32, u32)>,
}

impl BucketSet {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = lo.trim().parse().map_err(|_| {
                        AppError::Provider(format!("invalid bucket range: {}", part))
                    })?;
                    let hi: u32 = hi.trim().parse().map_err(|_| {
                        AppError::Provider(format!("invalid bucket range: {}", part))
                    })?;
                    if lo > hi {
                        return Err(AppError::Provider(format!(
                            "reversed bucket range: {}",
                            part
                        )));
                    }
                    ranges.push((lo, hi));
                }
                None => {
                    let v: u32 = part.parse().map_err(|_| {
                        AppError::Provider(format!("invalid bucket value: {}", part))
                    })?;
                    ranges.push((v, v));
                }
            }
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, bucket: u32) -> bool {
        self.ranges.iter().any(|&(lo, hi)| bucket >= lo && bucket <= hi)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    pub scene_id: i64,
    pub scene_name: String,
    pub scene_info: String,
    /// Scene-level parameter defaults, lowest merge precedence.
    #[serde(default)]
    pub config: Map<String, Value>,
    pub rooms: Vec<ExperimentRoom>,
}

impl Scene {
    pub fn default_room(&self) -> Option<&ExperimentRoom> {
        self.rooms.iter().find(|r| r.is_default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRoom {
    pub room_id: i64,
    pub scene_id: i64,
    pub name: String,
    pub info: String,
    pub bucket_count: u32,
    pub bucket_type: BucketType,
    pub buckets: BucketSet,
    pub filter: String,
    pub debug_users: Vec<String>,
    pub environment: u32,
    pub room_type: u32,
    pub status: u32,
    pub is_default: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub layers: Vec<Layer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layer {
    pub layer_id: i64,
    pub room_id: i64,
    pub scene_id: i64,
    pub name: String,
    pub info: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub groups: Vec<ExperimentGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentGroup {
    pub group_id: i64,
    pub layer_id: i64,
    pub room_id: i64,
    pub scene_id: i64,
    pub name: String,
    pub info: String,
    pub crowd_target_type: CrowdTargetType,
    pub debug_users: Vec<String>,
    pub filter: String,
    pub reserve_buckets: BucketSet,
    pub holding_buckets: BucketSet,
    pub status: u32,
    pub owner: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub versions: Vec<ExperimentVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVersion {
    pub experiment_id: i64,
    pub group_id: i64,
    pub layer_id: i64,
    pub room_id: i64,
    pub scene_id: i64,
    pub name: String,
    pub version_type: VersionType,
    /// Traffic share within the group, integer percentage 0..=100.
    pub flow: u32,
    pub buckets: BucketSet,
    pub debug_users: Vec<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub status: u32,
}

/// Split a comma-separated id list, dropping empty segments.
pub fn parse_debug_users(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_set_parse() {
        let set = BucketSet::parse("0-49,70, 90-99").unwrap();
        assert!(set.contains(0));
        assert!(set.contains(49));
        assert!(!set.contains(50));
        assert!(set.contains(70));
        assert!(!set.contains(71));
        assert!(set.contains(95));
        assert!(set.contains(99));
        assert!(!set.contains(100));
    }

    #[test]
    fn test_bucket_set_empty() {
        let set = BucketSet::parse("").unwrap();
        assert!(set.is_empty());
        assert!(!set.contains(0));
    }

    #[test]
    fn test_bucket_set_rejects_garbage() {
        assert!(BucketSet::parse("abc").is_err());
        assert!(BucketSet::parse("9-3").is_err());
    }

    #[test]
    fn test_parse_debug_users() {
        assert_eq!(parse_debug_users("a, b,,c"), vec!["a", "b", "c"]);
        assert!(parse_debug_users("").is_empty());
    }

    #[test]
    fn test_version_type_from_u32() {
        assert_eq!(VersionType::from_u32(1), VersionType::Control);
        assert_eq!(VersionType::from_u32(2), VersionType::Treatment);
        assert_eq!(VersionType::from_u32(0), VersionType::Control);
    }
}
