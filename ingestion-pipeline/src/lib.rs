pub mod extractor;
pub mod ingest;
pub mod pipeline;
pub mod resolver;

use std::sync::Arc;

use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::extraction_job::{ExtractionJob, JOB_TYPE_EXTRACT_EVENTS},
    },
    utils::config::AppConfig,
};

pub use ingest::{ArtifactIngestor, ForgetOutcome, RememberOutcome, RememberRequest, RememberStatus};
pub use pipeline::ExtractionPipeline;

/// Long-running worker loop: claim, process, repeat. Doubles as the queue
/// supervisor, periodically returning stale Processing jobs to Pending.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<ExtractionPipeline>,
    config: AppConfig,
) -> Result<(), AppError> {
    let worker_id = config
        .worker_id
        .clone()
        .unwrap_or_else(|| format!("extraction-worker-{}", Uuid::new_v4()));
    let poll_interval = Duration::from_millis(config.queue_poll_interval_ms);
    let sweep_interval =
        Duration::from_secs((config.stuck_job_threshold_s as u64 / 2).max(60));
    let mut last_sweep = Instant::now();

    info!(%worker_id, poll_ms = config.queue_poll_interval_ms, "worker started");

    loop {
        if last_sweep.elapsed() >= sweep_interval {
            last_sweep = Instant::now();
            match ExtractionJob::reset_stuck(&db, config.stuck_job_threshold_s).await {
                Ok(0) => {}
                Ok(count) => info!(%worker_id, count, "requeued stuck jobs"),
                Err(err) => error!(%worker_id, error = %err, "stuck-job sweep failed"),
            }
        }

        match ExtractionJob::claim(&db, &worker_id, JOB_TYPE_EXTRACT_EVENTS).await {
            Ok(Some(job)) => {
                info!(
                    %worker_id,
                    job_id = %job.id,
                    attempt = job.attempts,
                    "claimed extraction job"
                );
                pipeline.run_job(job).await;
            }
            Ok(None) => {
                sleep(poll_interval).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim job; backing off");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
