use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use common::{
    storage::db::SurrealDbClient,
    utils::{chunking::Chunker, config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{
    extractor::OpenAiExtractor, run_worker_loop, ArtifactIngestor, ExtractionPipeline,
};
use retrieval_pipeline::RecallEngine;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Combined binary: request surface and extraction workers in one process.
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

    // Extraction workers poll the queue independently of the server.
    for worker_index in 0..config.worker_count {
        let worker_db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        let extractor = Arc::new(OpenAiExtractor::from_config(&config));
        let pipeline = Arc::new(ExtractionPipeline::new(
            Arc::clone(&worker_db),
            Arc::clone(&embedder),
            extractor,
            &config,
        ));
        let mut worker_config = config.clone();
        worker_config.worker_id = Some(
            config
                .worker_id
                .clone()
                .map(|id| format!("{id}-{worker_index}"))
                .unwrap_or_else(|| format!("worker-{worker_index}")),
        );

        tokio::spawn(async move {
            if let Err(err) = run_worker_loop(worker_db, pipeline, worker_config).await {
                error!(worker_index, error = %err, "worker loop exited");
            }
        });
    }

    let state = ApiState::new(db, embedder, ingestor, engine, config.clone());
    let app = api_routes(&state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
