use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{extractor::OpenAiExtractor, run_worker_loop, ExtractionPipeline};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Standalone extraction worker process.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.build_indexes(config.embedding_dimensions as usize).await?;

    let embedder = Arc::new(EmbeddingProvider::from_config(&config));
    let extractor = Arc::new(OpenAiExtractor::from_config(&config));
    let pipeline = Arc::new(ExtractionPipeline::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        extractor,
        &config,
    ));

    run_worker_loop(db, pipeline, config).await?;

    Ok(())
}
