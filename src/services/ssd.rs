//! SSD diversity reranker.
//!
//! Greedy maximum-volume selection with a sliding window, after the paper at
//! <https://arxiv.org/pdf/2107.05204>. Starting from a score-sorted candidate
//! list, each step picks the item maximizing `score + volume * ||residual||`,
//! then projects the remaining embeddings orthogonal to the pick. Picks
//! older than the window are un-projected on their way out, so diversity
//! pressure only spans the last `w` selections.
//!
//! All knobs are read through the experiment parameter bundle with the
//! configured values as defaults, so an experiment version can retune the
//! reranker per request. Any internal failure degrades to the score-sorted
//! list; the reranker never fails a request.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use ndarray::Array1;
use rand::Rng;
use rand_distr::StandardNormal;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::experiment::filter::FilterExpr;
use crate::models::{Item, RecommendContext, User};
use crate::utils::{argmax, l2_norm, normalize};

use super::embedding::EmbeddingSource;

const QUALITY_SCORE_NAME: &str = "ssd_quality_score";

#[derive(Debug, Clone)]
pub struct SsdConfig {
    /// Bundle key holding the embedding table suffix; empty disables
    /// suffix lookup.
    pub table_suffix_param: String,
    pub gamma: f64,
    pub use_ssd_star: bool,
    pub normalize_emb: bool,
    pub ensure_positive_sim: bool,
    pub window_size: usize,
    pub abort_run_count: usize,
    pub candidate_count: usize,
    pub min_score_percent: f64,
    pub emb_miss_threshold: f64,
    pub filter_retrieve_ids: Vec<String>,
    /// Optional run condition over user properties; when it evaluates false
    /// the reranker passes candidates through in score order.
    pub condition: Option<String>,
    pub cache_capacity: u64,
    pub cache_idle_minutes: u64,
}

impl Default for SsdConfig {
    fn default() -> Self {
        Self {
            table_suffix_param: String::new(),
            gamma: 0.25,
            use_ssd_star: false,
            normalize_emb: true,
            ensure_positive_sim: true,
            window_size: 5,
            abort_run_count: 0,
            candidate_count: 0,
            min_score_percent: 0.0,
            emb_miss_threshold: 0.5,
            filter_retrieve_ids: Vec::new(),
            condition: None,
            cache_capacity: 500_000,
            cache_idle_minutes: 360,
        }
    }
}

pub struct SsdRanker {
    source: Arc<dyn EmbeddingSource>,
    cfg: SsdConfig,
    condition: Option<FilterExpr>,
    cache: Cache<String, Arc<Vec<f64>>>,
    last_table_suffix: RwLock<String>,
}

impl SsdRanker {
    pub fn new(source: Arc<dyn EmbeddingSource>, mut cfg: SsdConfig) -> Self {
        if cfg.gamma <= 0.0 {
            cfg.gamma = 0.25;
        }
        if cfg.window_size <= 1 {
            cfg.window_size = 5;
        }
        if cfg.emb_miss_threshold <= 0.0 {
            cfg.emb_miss_threshold = 0.5;
        }
        let condition = cfg.condition.as_deref().and_then(|raw| {
            match FilterExpr::parse(raw) {
                Ok(expr) => Some(expr),
                Err(e) => {
                    error!(error = %e, "invalid ssd run condition, ignoring it");
                    None
                }
            }
        });
        let cache = Cache::builder()
            .max_capacity(cfg.cache_capacity)
            .time_to_idle(Duration::from_secs(cfg.cache_idle_minutes * 60))
            .build();
        Self {
            source,
            cfg,
            condition,
            cache,
            last_table_suffix: RwLock::new(String::new()),
        }
    }

    /// Rerank a scored candidate list. Always returns a usable ordering;
    /// degraded paths fall back to score order.
    pub async fn rank(&self, ctx: &RecommendContext, user: &User, mut items: Vec<Item>) -> Vec<Item> {
        if items.is_empty() {
            return items;
        }

        if let Some(condition) = &self.condition {
            if !condition.evaluate(&user.feature_map()) {
                sort_by_score_desc(&mut items);
                debug!("ssd run condition evaluated false, returning score order");
                return items;
            }
        }

        if self.cfg.abort_run_count > 0 && items.len() <= self.cfg.abort_run_count {
            sort_by_score_desc(&mut items);
            info!(
                candidates = items.len(),
                abort_run_count = self.cfg.abort_run_count,
                "candidate count at or below abort threshold, returning score order"
            );
            return items;
        }

        let params = ctx.experiment.params();
        let mut filter_retrieve_ids = params.get_string_list("ssd_filter_retrieve_ids");
        if filter_retrieve_ids.is_empty() {
            filter_retrieve_ids = self.cfg.filter_retrieve_ids.clone();
        }

        let start = Instant::now();
        let result = if filter_retrieve_ids.is_empty() {
            self.rerank(items, ctx).await
        } else {
            let (mut excluded, selected): (Vec<Item>, Vec<Item>) = items
                .into_iter()
                .partition(|item| filter_retrieve_ids.contains(&item.retrieve_id));
            let mut result = self.rerank(selected, ctx).await;
            sort_by_score_desc(&mut excluded);
            result.extend(excluded);
            result
        };
        info!(
            count = result.len(),
            cost_ms = start.elapsed().as_millis() as u64,
            "ssd rerank finished"
        );
        result
    }

    async fn rerank(&self, mut items: Vec<Item>, ctx: &RecommendContext) -> Vec<Item> {
        if items.is_empty() {
            return items;
        }
        sort_by_score_desc(&mut items);

        let params = ctx.experiment.params();
        let gamma = params.get_float("ssd_gamma", self.cfg.gamma);
        let candidate_count = params
            .get_int("ssd_candidate_count", self.cfg.candidate_count as i64)
            .max(0) as usize;
        let min_score_percent =
            params.get_float("ssd_min_score_percent", self.cfg.min_score_percent);

        if (candidate_count > 0 || min_score_percent > 0.0) && items.len() > ctx.size {
            if candidate_count > 0 {
                let keep = ctx.size.max(candidate_count);
                if keep < items.len() {
                    items.truncate(keep);
                }
            }
            if min_score_percent > 0.0 && items.len() > ctx.size {
                let max_score = items[0].score;
                let mut end = ctx.size;
                while end < items.len() && items[end].score / max_score >= min_score_percent {
                    end += 1;
                }
                items.truncate(end);
            }
            info!(candidates = items.len(), "ssd candidate set truncated");
        }

        if gamma == 0.0 {
            debug!("ssd gamma is zero, skipping rerank");
            return items;
        }

        if let Err(e) = self.load_embeddings(ctx, &mut items).await {
            error!(error = %e, "embedding load failed, returning score order");
            return items;
        }

        self.sliding_window_rerank(items, ctx, gamma)
    }

    async fn load_embeddings(&self, ctx: &RecommendContext, items: &mut [Item]) -> Result<()> {
        let params = ctx.experiment.params();
        let table_suffix = if self.cfg.table_suffix_param.is_empty() {
            String::new()
        } else {
            params.get_string(&self.cfg.table_suffix_param, "")
        };

        // Invalidate at most once per suffix change; the double check keeps
        // concurrent requests from invalidating twice.
        if *self.last_table_suffix.read().await != table_suffix {
            let mut last = self.last_table_suffix.write().await;
            if *last != table_suffix {
                self.cache.invalidate_all();
                *last = table_suffix.clone();
            }
        }

        let normalize_emb = params.get_bool("normalize_emb", self.cfg.normalize_emb);
        let ensure_positive = params.get_bool("ensure_positive_sim", self.cfg.ensure_positive_sim);
        let miss_threshold = params.get_float("emb_miss_threshold", self.cfg.emb_miss_threshold);

        let mut embed_size = 0usize;
        let mut absent: Vec<String> = Vec::new();
        for item in items.iter_mut() {
            match self.cache.get(&item.id) {
                Some(vector) => {
                    if embed_size == 0 {
                        embed_size = vector.len();
                    } else if embed_size != vector.len() {
                        return Err(AppError::Reranker(format!(
                            "item {} embedding size mismatch, got {}, expected {}",
                            item.id,
                            vector.len(),
                            embed_size
                        )));
                    }
                    item.embedding = Some(Array1::from_vec((*vector).clone()));
                }
                None => absent.push(item.id.clone()),
            }
        }

        if !absent.is_empty() {
            let fetched = self.source.fetch(&table_suffix, &absent).await?;

            // Post-process before touching cache state so an aborted load
            // leaves the cache exactly as it was.
            let mut processed: HashMap<String, Vec<f64>> = HashMap::with_capacity(fetched.len());
            for (id, vector) in fetched {
                let mut vector = Array1::from_vec(vector);
                if normalize_emb {
                    normalize(&mut vector);
                }
                let mut vector = vector.to_vec();
                if ensure_positive {
                    vector.push(1.0);
                }
                if embed_size == 0 {
                    embed_size = vector.len();
                } else if embed_size != vector.len() {
                    return Err(AppError::Reranker(format!(
                        "item {} embedding size mismatch, got {}, expected {}",
                        id,
                        vector.len(),
                        embed_size
                    )));
                }
                processed.insert(id, vector);
            }

            let missing = absent.len() - processed.len();
            if missing as f64 / items.len() as f64 > miss_threshold {
                return Err(AppError::Reranker(format!(
                    "{} of {} items missing embeddings, above threshold",
                    missing,
                    items.len()
                )));
            }

            for (id, vector) in &processed {
                self.cache.insert(id.clone(), Arc::new(vector.clone()));
            }
            for item in items.iter_mut() {
                if item.embedding.is_none() {
                    if let Some(vector) = processed.get(&item.id) {
                        item.embedding = Some(Array1::from_vec(vector.clone()));
                    }
                }
            }

            if missing > 0 {
                if embed_size == 0 {
                    return Err(AppError::Reranker("no embedding detected".to_string()));
                }
                let mut rng = rand::thread_rng();
                for item in items.iter_mut() {
                    if item.embedding.is_none() {
                        warn!(item_id = %item.id, "missing embedding, synthesizing random vector");
                        let mut vector = Array1::from_shape_fn(embed_size, |_| {
                            rng.sample::<f64, _>(StandardNormal)
                        });
                        normalize(&mut vector);
                        item.embedding = Some(vector);
                    }
                }
            }
        }

        if ctx.debug {
            debug!(
                ctx_size = ctx.size,
                items = items.len(),
                embed_size, "embedding load complete"
            );
        }
        Ok(())
    }

    fn sliding_window_rerank(
        &self,
        mut items: Vec<Item>,
        ctx: &RecommendContext,
        gamma: f64,
    ) -> Vec<Item> {
        let params = ctx.experiment.params();
        let mut window = params.get_int("ssd_window_size", self.cfg.window_size as i64);
        if window <= 1 {
            warn!("ssd window size must be > 1, using 5");
            window = 5;
        }
        let window = window as usize;
        let use_ssd_star = params.get_bool("use_ssd_star", self.cfg.use_ssd_star);

        let n = items.len();
        let mut relevance: Vec<f64> = items.iter().map(|item| item.score).collect();

        match params.get_int("ssd_norm_quality_score", 0) {
            1 => {
                let mean = relevance.iter().sum::<f64>() / n as f64;
                let variance =
                    relevance.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;
                if mean == 0.0 || variance == 0.0 {
                    error!("all item scores are zero, returning score order");
                    return items;
                }
                let std = variance.sqrt();
                for (i, r) in relevance.iter_mut().enumerate() {
                    *r = (*r - mean) / std;
                    items[i].add_algo_score(QUALITY_SCORE_NAME, *r);
                }
            }
            2 => {
                let max_score = relevance[0];
                let min_score = relevance[n - 1];
                let span = max_score - min_score;
                if span == 0.0 {
                    error!("all item scores are equal, returning score order");
                    return items;
                }
                let epsilon = 1e-6;
                for (i, r) in relevance.iter_mut().enumerate() {
                    *r = ((*r - min_score) / span) * (1.0 - epsilon) + epsilon;
                    items[i].add_algo_score(QUALITY_SCORE_NAME, *r);
                }
            }
            _ => {}
        }

        let target = n.min(ctx.size);
        if target == 0 {
            return Vec::new();
        }

        let mut embeddings: Vec<Array1<f64>> = Vec::with_capacity(n);
        for item in &items {
            match &item.embedding {
                Some(e) => embeddings.push(e.clone()),
                None => {
                    error!(item_id = %item.id, "candidate without embedding, returning score order");
                    return items;
                }
            }
        }

        let mut selected = vec![false; n];
        let mut idx = argmax(&relevance);
        selected[idx] = true;
        let mut picks = Vec::with_capacity(target);
        picks.push(idx);

        let mut volume = gamma;
        if !use_ssd_star {
            let norm = l2_norm(&embeddings[idx]);
            if norm.is_finite() {
                volume *= norm;
            } else {
                error!(item_id = %items[idx].id, "invalid embedding norm on first pick");
            }
        }

        let mut window_picks: VecDeque<usize> = VecDeque::with_capacity(window);
        let mut window_projections: VecDeque<Vec<f64>> = VecDeque::with_capacity(window);
        let mut t = 1;
        while t < target {
            if t > window {
                // The oldest pick leaves the window; undo its projection on
                // every remaining candidate.
                if let (Some(old), Some(projections)) =
                    (window_picks.pop_front(), window_projections.pop_front())
                {
                    let e_old = embeddings[old].clone();
                    for j in 0..n {
                        if selected[j] {
                            continue;
                        }
                        embeddings[j].scaled_add(projections[j], &e_old);
                    }
                }
            }

            window_picks.push_back(idx);
            let e_pick = embeddings[idx].clone();
            let denom = e_pick.dot(&e_pick);
            let mut projections = vec![0.0; n];
            for j in 0..n {
                if selected[j] {
                    continue;
                }
                let mut p = embeddings[j].dot(&e_pick) / denom;
                if !p.is_finite() {
                    warn!(item_id = %items[j].id, "invalid projection coefficient, using 1.0");
                    p = 1.0;
                }
                projections[j] = p;
                embeddings[j].scaled_add(-p, &e_pick);
            }
            window_projections.push_back(projections);
            t += 1;

            let mut qualities = vec![f64::NEG_INFINITY; n];
            for (i, &r) in relevance.iter().enumerate() {
                if selected[i] {
                    continue;
                }
                let norm = l2_norm(&embeddings[i]);
                qualities[i] = if norm.is_finite() {
                    r + volume * norm
                } else {
                    error!(item_id = %items[i].id, "invalid residual norm");
                    r + volume * 0.5
                };
            }
            idx = argmax(&qualities);
            selected[idx] = true;
            picks.push(idx);

            if !use_ssd_star {
                let norm = l2_norm(&embeddings[idx]);
                if norm.is_finite() {
                    volume *= norm;
                } else {
                    error!(item_id = %items[idx].id, "invalid embedding norm on pick");
                }
            }
        }

        let mut slots: Vec<Option<Item>> = items.into_iter().map(Some).collect();
        picks.into_iter().filter_map(|i| slots[i].take()).collect()
    }
}

fn sort_by_score_desc(items: &mut [Item]) {
    items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}
