pub mod config;
pub mod error;
pub mod experiment;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use experiment::{ExperimentService, ExperimentStore};
pub use services::RecommendService;
