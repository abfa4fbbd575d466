use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recommend_service::config::Config;
use recommend_service::error::{AppError, Result};
use recommend_service::experiment::provider::native::{
    HttpSceneSource, NativeProvider, StaticSceneSource,
};
use recommend_service::experiment::provider::pai::{HttpProjectSource, PaiProvider};
use recommend_service::experiment::provider::DEFAULT_REFRESH_INTERVAL;
use recommend_service::experiment::{ExperimentProvider, ExperimentService, ProviderKind};
use recommend_service::handlers::{health, recommend, AppState};
use recommend_service::services::{
    SqlEmbeddingSource, SsdConfig, SsdRanker, StaticCandidateSource,
};
use recommend_service::{jobs, RecommendService};

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Failed to load configuration");

    info!(
        "Starting recommend-service v{} on port {}",
        env!("CARGO_PKG_VERSION"),
        config.app.port
    );

    // Experiment provider selection is fatal only when misconfigured;
    // running without a provider serves empty parameter bundles.
    let provider = build_provider(&config).unwrap_or_else(|e| {
        panic!("Failed to configure experiment provider: {}", e);
    });
    let refresh_interval = if config.abtest.refresh_interval_secs > 0 {
        Duration::from_secs(config.abtest.refresh_interval_secs)
    } else {
        DEFAULT_REFRESH_INTERVAL
    };
    let experiments = Arc::new(ExperimentService::new(provider, refresh_interval));

    // First refresh runs synchronously so the first request already sees a
    // snapshot; a failure here is degraded service, not a startup error.
    if let Err(e) = experiments.refresh().await {
        error!(error = %e, "initial experiment refresh failed, starting with empty store");
    }

    let db_pool = match &config.database {
        Some(db) => Some(
            sqlx::postgres::PgPoolOptions::new()
                .max_connections(db.max_connections)
                .connect_lazy(&db.url)
                .expect("Failed to create database pool"),
        ),
        None => {
            warn!("DATABASE_URL not set, embedding-backed reranking disabled");
            None
        }
    };

    let ranker = match (&db_pool, config.embedding.table_name.is_empty()) {
        (Some(pool), false) => {
            let source = SqlEmbeddingSource::new(
                pool.clone(),
                &config.embedding.table_name,
                &config.embedding.key_field,
                &config.embedding.embedding_field,
                &config.embedding.separator,
            );
            Some(Arc::new(SsdRanker::new(
                Arc::new(source),
                SsdConfig {
                    table_suffix_param: config.embedding.table_suffix_param.clone(),
                    gamma: config.ssd.gamma,
                    use_ssd_star: config.ssd.use_ssd_star,
                    normalize_emb: config.ssd.normalize_emb,
                    ensure_positive_sim: config.ssd.ensure_positive_sim,
                    window_size: config.ssd.window_size,
                    abort_run_count: config.ssd.abort_run_count,
                    candidate_count: config.ssd.candidate_count,
                    min_score_percent: config.ssd.min_score_percent,
                    emb_miss_threshold: config.ssd.emb_miss_threshold,
                    filter_retrieve_ids: config.ssd.filter_retrieve_ids.clone(),
                    condition: config.ssd.condition.clone(),
                    cache_capacity: config.embedding.cache_capacity,
                    cache_idle_minutes: config.embedding.cache_idle_minutes,
                },
            )))
        }
        _ => {
            warn!("no embedding table configured, serving score order");
            None
        }
    };

    // Candidate generation and model scoring are upstream stages; deployments
    // plug their retrieval behind CandidateSource. The default serves an
    // empty set.
    let recall = Arc::new(StaticCandidateSource::default());

    let service = Arc::new(RecommendService::new(
        experiments.clone(),
        recall,
        None,
        ranker,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = tokio::spawn(jobs::run_experiment_refresh(
        experiments.clone(),
        shutdown_rx,
    ));

    let state = web::Data::new(AppState { service });
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .service(recommend)
            .service(health)
    })
    .bind(("0.0.0.0", config.app.port))?
    .run()
    .await;

    shutdown_tx.send(true).ok();
    refresher.await.ok();

    server
}

fn build_provider(config: &Config) -> Result<Arc<dyn ExperimentProvider>> {
    match ProviderKind::detect(&config.abtest) {
        Some(ProviderKind::Pairec) => {
            let environment = config
                .abtest
                .pairec_environment
                .as_deref()
                .unwrap_or("product");
            info!(environment, "using native experiment provider");
            let source = HttpSceneSource::new(&config.abtest.endpoint, environment);
            Ok(Arc::new(NativeProvider::new(Arc::new(source))))
        }
        Some(ProviderKind::Pai) => {
            let region = require_credential(&config.abtest.region, "REGION")?;
            let access_key = require_credential(&config.abtest.access_key, "AccessKey")?;
            let access_secret = require_credential(&config.abtest.access_secret, "AccessSecret")?;
            info!(region = %region, "using foreign experiment provider");
            let source =
                HttpProjectSource::new(&config.abtest.endpoint, &region, &access_key, &access_secret);
            Ok(Arc::new(PaiProvider::new(Arc::new(source))))
        }
        None => {
            warn!("no experiment provider configured, serving empty parameter bundles");
            Ok(Arc::new(NativeProvider::new(Arc::new(
                StaticSceneSource::new(vec![]),
            ))))
        }
    }
}

fn require_credential(value: &Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(AppError::Config(format!(
            "environment variable {} is required for the pai provider",
            name
        ))),
    }
}
