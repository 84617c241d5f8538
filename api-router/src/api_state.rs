use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient, utils::config::AppConfig, utils::embedding::EmbeddingProvider,
};
use ingestion_pipeline::ArtifactIngestor;
use retrieval_pipeline::RecallEngine;

/// Shared state behind every request handler. Constructed once at startup;
/// handlers never create their own clients or pools.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub embedder: Arc<EmbeddingProvider>,
    pub ingestor: Arc<ArtifactIngestor>,
    pub engine: Arc<RecallEngine>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        ingestor: Arc<ArtifactIngestor>,
        engine: Arc<RecallEngine>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            ingestor,
            engine,
            config,
        }
    }
}
