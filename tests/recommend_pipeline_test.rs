//! End-to-end pipeline test: a foreign provider graph is translated and
//! published, a request is matched to an experiment version, and the
//! version's knobs drive the SSD reranker over a static candidate set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use recommend_service::experiment::bucket_of;
use recommend_service::experiment::provider::pai::{
    PaiProvider, Project, ProjectExperiment, ProjectExperimentVersion, ProjectLayer,
    StaticProjectSource,
};
use recommend_service::experiment::provider::pai::Domain;
use recommend_service::experiment::ExperimentService;
use recommend_service::models::Item;
use recommend_service::services::{
    SsdConfig, SsdRanker, StaticCandidateSource, StaticEmbeddingSource,
};
use recommend_service::RecommendService;

const GROUP_ID: i64 = 700;

fn experiment_project() -> Project {
    Project {
        project_id: 31,
        project_name: "pairec_home".to_string(),
        project_info: String::new(),
        default_domain_id: 7,
        domains: vec![Domain {
            domain_id: 7,
            name: "default".to_string(),
            info: String::new(),
            debug_users: String::new(),
            buckets: "0-99".to_string(),
            bucket_type: 0,
            filter: String::new(),
            layers: vec![ProjectLayer {
                layer_id: 70,
                name: "rank".to_string(),
                info: String::new(),
                experiments: vec![ProjectExperiment {
                    experiment_id: GROUP_ID,
                    name: "ssd_gamma_exp".to_string(),
                    info: String::new(),
                    debug_users: String::new(),
                    filter: String::new(),
                    buckets: String::new(),
                    owner: String::new(),
                    status: 1,
                    versions: vec![
                        ProjectExperimentVersion {
                            version_id: 7001,
                            name: "control".to_string(),
                            info: String::new(),
                            version_type: 1,
                            flow: 50,
                            buckets: "0-49".to_string(),
                            debug_users: String::new(),
                            config: r#"[{"key":"ssd_gamma","value":"0","type":"float"}]"#
                                .to_string(),
                        },
                        ProjectExperimentVersion {
                            version_id: 7002,
                            name: "treatment".to_string(),
                            info: String::new(),
                            version_type: 2,
                            flow: 50,
                            buckets: "50-99".to_string(),
                            debug_users: String::new(),
                            config: r#"[{"key":"ssd_gamma","value":"0.5","type":"float"}]"#
                                .to_string(),
                        },
                    ],
                }],
            }],
        }],
    }
}

async fn experiments() -> Arc<ExperimentService> {
    let provider = PaiProvider::new(Arc::new(StaticProjectSource::new(vec![
        experiment_project(),
    ])));
    let service = Arc::new(ExperimentService::new(
        Arc::new(provider),
        Duration::from_secs(60),
    ));
    service.refresh().await.expect("refresh failed");
    service
}

/// Candidates where diversity changes the ordering: the top two items share
/// a direction, the third is orthogonal.
fn candidates() -> Vec<Item> {
    vec![
        Item::with_score("a", "vector", 1.0),
        Item::with_score("b", "vector", 0.9),
        Item::with_score("c", "vector", 0.8),
    ]
}

fn ranker() -> Arc<SsdRanker> {
    let mut vectors = HashMap::new();
    vectors.insert("a".to_string(), vec![1.0, 0.0]);
    vectors.insert("b".to_string(), vec![1.0, 0.0]);
    vectors.insert("c".to_string(), vec![0.0, 1.0]);
    Arc::new(SsdRanker::new(
        Arc::new(StaticEmbeddingSource::new(vectors)),
        SsdConfig {
            ensure_positive_sim: false,
            ..Default::default()
        },
    ))
}

/// First uid (by counter) whose group-level bucket lands inside `range`.
fn uid_in_bucket_range(lo: u32, hi: u32) -> String {
    (0..10_000)
        .map(|i| format!("user-{}", i))
        .find(|uid| {
            let bucket = bucket_of(uid, GROUP_ID, 100);
            bucket >= lo && bucket <= hi
        })
        .expect("no uid found in bucket range")
}

#[tokio::test]
async fn test_control_user_gets_score_order() {
    let experiments = experiments().await;
    let service = RecommendService::new(
        experiments,
        Arc::new(StaticCandidateSource::new(candidates())),
        None,
        Some(ranker()),
    );

    let uid = uid_in_bucket_range(0, 49);
    let ctx = service.make_context("r1", "home", &uid, 3, false, Default::default());

    assert_eq!(ctx.experiment.params().get_float("ssd_gamma", -1.0), 0.0);
    assert_eq!(ctx.experiment.layers.len(), 1);
    assert_eq!(ctx.experiment.layers[0].experiment_id, 7001);

    let out = service.recommend(&ctx).await;
    let ids: Vec<&str> = out.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_treatment_user_gets_diversified_order() {
    let experiments = experiments().await;
    let service = RecommendService::new(
        experiments,
        Arc::new(StaticCandidateSource::new(candidates())),
        None,
        Some(ranker()),
    );

    let uid = uid_in_bucket_range(50, 99);
    let ctx = service.make_context("r1", "home", &uid, 3, false, Default::default());

    assert_eq!(ctx.experiment.params().get_float("ssd_gamma", -1.0), 0.5);
    assert_eq!(ctx.experiment.layers[0].experiment_id, 7002);

    let out = service.recommend(&ctx).await;
    let ids: Vec<&str> = out.iter().map(|item| item.id.as_str()).collect();
    // The orthogonal item overtakes the duplicated direction.
    assert_eq!(ids, vec!["a", "c", "b"]);
}

#[tokio::test]
async fn test_unknown_scene_serves_score_order() {
    let experiments = experiments().await;
    let service = RecommendService::new(
        experiments,
        Arc::new(StaticCandidateSource::new(candidates())),
        None,
        Some(ranker()),
    );

    let ctx = service.make_context("r1", "unknown_scene", "u1", 2, false, Default::default());
    assert!(ctx.experiment.params().is_empty());

    // Default gamma (0.25) still reranks; output is truncated to size.
    let out = service.recommend(&ctx).await;
    assert_eq!(out.len(), 2);
}

#[tokio::test]
async fn test_assignment_is_stable_across_requests() {
    let experiments = experiments().await;
    let service = RecommendService::new(
        experiments,
        Arc::new(StaticCandidateSource::new(candidates())),
        None,
        Some(ranker()),
    );

    let uid = uid_in_bucket_range(50, 99);
    let first = service.make_context("r1", "home", &uid, 3, false, Default::default());
    let second = service.make_context("r2", "home", &uid, 3, false, Default::default());
    assert_eq!(
        first.experiment.layers[0].experiment_id,
        second.experiment.layers[0].experiment_id
    );
}
