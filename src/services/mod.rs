pub mod embedding;
pub mod feature_fetch;
pub mod recall;
pub mod recommend;
pub mod ssd;

pub use embedding::{EmbeddingSource, SqlEmbeddingSource, StaticEmbeddingSource};
pub use feature_fetch::{FeatureFetchConfig, FeatureFetchDao, FeatureStoreClient};
pub use recall::{CandidateSource, StaticCandidateSource};
pub use recommend::RecommendService;
pub use ssd::{SsdConfig, SsdRanker};
