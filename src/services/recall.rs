//! Candidate retrieval seam.
//!
//! Retrieval and model scoring run upstream of this service; they plug in
//! through `CandidateSource`, which yields `(item, score, embedding?)`
//! triples as scored `Item`s.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Item, RecommendContext, User};

#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &str;

    async fn candidates(&self, ctx: &RecommendContext, user: &User) -> Result<Vec<Item>>;
}

/// Fixed candidate set. Stands in when no upstream retrieval is wired and
/// backs the pipeline tests.
#[derive(Default)]
pub struct StaticCandidateSource {
    items: Vec<Item>,
}

impl StaticCandidateSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn candidates(&self, _ctx: &RecommendContext, _user: &User) -> Result<Vec<Item>> {
        Ok(self.items.clone())
    }
}
