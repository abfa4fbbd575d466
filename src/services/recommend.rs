//! Request pipeline: experiment match, candidate recall, feature hydration,
//! diversity rerank, final truncation.
//!
//! Every stage degrades instead of failing: a broken stage logs and the
//! request continues with whatever the previous stages produced. Callers see
//! fewer or less polished items, never an error.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{error, info};

use crate::experiment::ExperimentService;
use crate::models::{Item, RecommendContext, User};

use super::feature_fetch::FeatureFetchDao;
use super::recall::CandidateSource;
use super::ssd::SsdRanker;

pub struct RecommendService {
    experiments: Arc<ExperimentService>,
    recall: Arc<dyn CandidateSource>,
    feature_dao: Option<Arc<FeatureFetchDao>>,
    ranker: Option<Arc<SsdRanker>>,
}

impl RecommendService {
    pub fn new(
        experiments: Arc<ExperimentService>,
        recall: Arc<dyn CandidateSource>,
        feature_dao: Option<Arc<FeatureFetchDao>>,
        ranker: Option<Arc<SsdRanker>>,
    ) -> Self {
        Self {
            experiments,
            recall,
            feature_dao,
            ranker,
        }
    }

    /// Build the per-request context, resolving the experiment assignment
    /// from a single store snapshot.
    pub fn make_context(
        &self,
        request_id: &str,
        scene: &str,
        uid: &str,
        size: usize,
        debug: bool,
        features: Map<String, Value>,
    ) -> RecommendContext {
        let experiment = self.experiments.match_experiment(scene, uid, &features);
        info!(request_id, experiment = %experiment.info(), "experiment matched");
        RecommendContext {
            request_id: request_id.to_string(),
            scene: scene.to_string(),
            uid: uid.to_string(),
            size,
            debug,
            features,
            experiment,
        }
    }

    /// Run the full pipeline for one request.
    pub async fn recommend(&self, ctx: &RecommendContext) -> Vec<Item> {
        let start = Instant::now();
        let mut user = User::new(&ctx.uid);
        for (k, v) in &ctx.features {
            user.properties.insert(k.clone(), v.clone());
        }

        let mut items = match self.recall.candidates(ctx, &user).await {
            Ok(items) => items,
            Err(e) => {
                error!(
                    request_id = %ctx.request_id,
                    source = self.recall.name(),
                    error = %e,
                    "candidate recall failed"
                );
                Vec::new()
            }
        };

        if let Some(dao) = &self.feature_dao {
            dao.fetch_user_features(&mut user, ctx).await;
            dao.fetch_item_features(&mut items, ctx).await;
        }

        let mut items = match &self.ranker {
            Some(ranker) => ranker.rank(ctx, &user, items).await,
            None => {
                items.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                items
            }
        };
        items.truncate(ctx.size);

        info!(
            request_id = %ctx.request_id,
            count = items.len(),
            cost_ms = start.elapsed().as_millis() as u64,
            "recommend pipeline finished"
        );
        items
    }
}
