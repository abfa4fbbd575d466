//! A/B experiment routing: scene graph, snapshot store, providers and the
//! match engine.

pub mod bucket;
pub mod filter;
pub mod matcher;
pub mod model;
pub mod params;
pub mod provider;
pub mod store;

pub use bucket::bucket_of;
pub use matcher::{match_experiment, ExperimentResult, LayerMatch};
pub use params::ExperimentParams;
pub use provider::{ExperimentProvider, ExperimentService, ProviderKind};
pub use store::{ExperimentStore, Snapshot};
