use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use common::{
    storage::db::SurrealDbClient,
    utils::{chunking::Chunker, config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::ArtifactIngestor;
use retrieval_pipeline::RecallEngine;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Request surface only; pair with the `worker` binary for extraction.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
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
    let chunker = Chunker::from_config(&config)?;
    let ingestor = Arc::new(ArtifactIngestor::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        chunker,
        config.clone(),
    ));
    let engine = Arc::new(RecallEngine::new(
        Arc::clone(&db),
        Arc::clone(&embedder),
        config.clone(),
    ));

    let state = ApiState::new(db, embedder, ingestor, engine, config.clone());
    let app = api_routes(&state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
