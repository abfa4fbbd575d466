use serde::Deserialize;
use std::env;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: Option<DatabaseConfig>,
    pub abtest: AbTestConfig,
    pub embedding: EmbeddingConfig,
    pub ssd: SsdSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Experiment provider selection and credentials. The environment contract:
/// `PAIREC_ENVIRONMENT` selects the native provider, `PAIABTEST_ENVIRONMENT`
/// the foreign one (consulted only when the former is unset), and
/// `ABTEST_PROVIDER` overrides auto-detection. The foreign provider requires
/// `REGION`, `AccessKey` and `AccessSecret`.
#[derive(Debug, Clone, Deserialize)]
pub struct AbTestConfig {
    pub provider: Option<String>,
    pub pairec_environment: Option<String>,
    pub paiabtest_environment: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub access_secret: Option<String>,
    pub endpoint: String,
    pub refresh_interval_secs: u64,
}

impl Default for AbTestConfig {
    fn default() -> Self {
        Self {
            provider: None,
            pairec_environment: None,
            paiabtest_environment: None,
            region: None,
            access_key: None,
            access_secret: None,
            endpoint: "http://localhost:8088".to_string(),
            refresh_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Base table name; empty disables embedding loading (and with it the
    /// SSD reranker).
    pub table_name: String,
    /// Bundle key that carries the table suffix.
    pub table_suffix_param: String,
    pub key_field: String,
    pub embedding_field: String,
    pub separator: String,
    pub cache_capacity: u64,
    pub cache_idle_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SsdSettings {
    pub gamma: f64,
    pub window_size: usize,
    pub abort_run_count: usize,
    pub candidate_count: usize,
    pub min_score_percent: f64,
    pub emb_miss_threshold: f64,
    pub use_ssd_star: bool,
    pub normalize_emb: bool,
    pub ensure_positive_sim: bool,
    pub filter_retrieve_ids: Vec<String>,
    pub condition: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            app: AppConfig {
                port: parse_env("APP_PORT", 8000)?,
            },
            database: env::var("DATABASE_URL").ok().map(|url| {
                Ok::<_, AppError>(DatabaseConfig {
                    url,
                    max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                })
            }).transpose()?,
            abtest: AbTestConfig {
                provider: env::var("ABTEST_PROVIDER").ok(),
                pairec_environment: env::var("PAIREC_ENVIRONMENT").ok(),
                paiabtest_environment: env::var("PAIABTEST_ENVIRONMENT").ok(),
                region: env::var("REGION").ok(),
                access_key: env::var("AccessKey").ok(),
                access_secret: env::var("AccessSecret").ok(),
                endpoint: env::var("ABTEST_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:8088".to_string()),
                refresh_interval_secs: parse_env("ABTEST_REFRESH_INTERVAL_SECS", 60)?,
            },
            embedding: EmbeddingConfig {
                table_name: env::var("EMB_TABLE_NAME").unwrap_or_default(),
                table_suffix_param: env::var("EMB_TABLE_SUFFIX_PARAM").unwrap_or_default(),
                key_field: env::var("EMB_KEY_FIELD").unwrap_or_else(|_| "item_id".to_string()),
                embedding_field: env::var("EMB_COLUMN")
                    .unwrap_or_else(|_| "embedding".to_string()),
                separator: env::var("EMB_SEPARATOR").unwrap_or_else(|_| ",".to_string()),
                cache_capacity: parse_env("EMB_CACHE_CAPACITY", 500_000)?,
                cache_idle_minutes: parse_env("EMB_CACHE_IDLE_MINUTES", 360)?,
            },
            ssd: SsdSettings {
                gamma: parse_env("SSD_GAMMA", 0.25)?,
                window_size: parse_env("SSD_WINDOW_SIZE", 5)?,
                abort_run_count: parse_env("SSD_ABORT_RUN_COUNT", 0)?,
                candidate_count: parse_env("SSD_CANDIDATE_COUNT", 0)?,
                min_score_percent: parse_env("SSD_MIN_SCORE_PERCENT", 0.0)?,
                emb_miss_threshold: parse_env("SSD_EMB_MISS_THRESHOLD", 0.5)?,
                use_ssd_star: parse_env("SSD_USE_SSD_STAR", false)?,
                normalize_emb: parse_env("SSD_NORMALIZE_EMB", true)?,
                ensure_positive_sim: parse_env("SSD_ENSURE_POSITIVE_SIM", true)?,
                filter_retrieve_ids: env::var("SSD_FILTER_RETRIEVE_IDS")
                    .map(|raw| {
                        raw.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                condition: env::var("SSD_CONDITION").ok(),
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid {}", key, std::any::type_name::<T>()))),
        Err(_) => Ok(default),
    }
}
