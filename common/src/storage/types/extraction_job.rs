use chrono::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// The only job type the core ships. The column exists so further background
/// work can share the queue without schema changes.
pub const JOB_TYPE_EXTRACT_EVENTS: &str = "extract_events";

/// How many ready candidates a single claim call will race for before giving
/// up and reporting an empty queue.
const CLAIM_CANDIDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

stored_object!(ExtractionJob, "extraction_job", {
    job_type: String,
    artifact_uid: String,
    revision_id: String,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    next_run_at: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    locked_by: Option<String>,
    #[serde(default)]
    last_error_code: Option<String>,
    #[serde(default)]
    last_error_message: Option<String>
});

/// Queue depth summary for `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub oldest_pending_age_s: Option<i64>,
}

#[derive(Deserialize)]
struct CountRow {
    count: usize,
}

impl ExtractionJob {
    /// Retry delay after `attempts` failed runs, capped at ten minutes.
    pub fn backoff_seconds(attempts: u32) -> i64 {
        let exp = attempts.min(16);
        (30_i64.saturating_mul(1_i64 << exp)).min(600)
    }

    fn new(artifact_uid: &str, revision_id: &str, job_type: &str, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            job_type: job_type.to_string(),
            artifact_uid: artifact_uid.to_string(),
            revision_id: revision_id.to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            next_run_at: now,
            locked_at: None,
            locked_by: None,
            last_error_code: None,
            last_error_message: None,
        }
    }

    pub async fn find_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
        job_type: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM extraction_job \
                 WHERE artifact_uid = $artifact_uid \
                   AND revision_id = $revision_id \
                   AND job_type = $job_type \
                 LIMIT 1",
            )
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .bind(("revision_id", revision_id.to_owned()))
            .bind(("job_type", job_type.to_owned()))
            .await?;
        let found: Vec<Self> = response.take(0)?;

        Ok(found.into_iter().next())
    }

    /// Enqueue a job, idempotent on `(artifact_uid, revision_id, job_type)`.
    /// Returns the existing job when one is already queued.
    pub async fn enqueue(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
        job_type: &str,
        max_attempts: u32,
    ) -> Result<Self, AppError> {
        if let Some(existing) =
            Self::find_for_revision(db, artifact_uid, revision_id, job_type).await?
        {
            info!(
                job_id = %existing.id,
                %artifact_uid,
                %revision_id,
                "job already queued for revision"
            );
            return Ok(existing);
        }

        let job = Self::new(artifact_uid, revision_id, job_type, max_attempts);
        match db.store_item(job.clone()).await {
            Ok(_) => {
                info!(job_id = %job.id, %artifact_uid, %revision_id, "enqueued job");
                Ok(job)
            }
            // A concurrent enqueue can beat us to the unique index; the
            // surviving row is the answer either way.
            Err(err) => match Self::find_for_revision(db, artifact_uid, revision_id, job_type)
                .await?
            {
                Some(existing) => Ok(existing),
                None => Err(AppError::Database(err)),
            },
        }
    }

    /// Claim the oldest ready job of a type. The flip from Pending to
    /// Processing is a single conditional update, so concurrent claimants
    /// race on the same candidate and exactly one wins; losers move to the
    /// next candidate.
    pub async fn claim(
        db: &SurrealDbClient,
        worker_id: &str,
        job_type: &str,
    ) -> Result<Option<Self>, AppError> {
        for _ in 0..CLAIM_CANDIDATE_ATTEMPTS {
            let now = surrealdb::sql::Datetime::from(Utc::now());
            let mut response = db
                .query(
                    "SELECT * FROM extraction_job \
                     WHERE status = 'PENDING' \
                       AND job_type = $job_type \
                       AND next_run_at <= $now \
                     ORDER BY created_at ASC \
                     LIMIT 1",
                )
                .bind(("job_type", job_type.to_owned()))
                .bind(("now", now.clone()))
                .await?;
            let candidates: Vec<Self> = response.take(0)?;
            let Some(candidate) = candidates.into_iter().next() else {
                return Ok(None);
            };

            let mut response = db
                .query(
                    "UPDATE type::thing('extraction_job', $job_id) SET \
                       status = 'PROCESSING', \
                       locked_by = $worker_id, \
                       locked_at = $now, \
                       attempts += 1, \
                       updated_at = $now \
                     WHERE status = 'PENDING' AND next_run_at <= $now \
                     RETURN AFTER",
                )
                .bind(("job_id", candidate.id.clone()))
                .bind(("worker_id", worker_id.to_owned()))
                .bind(("now", now))
                .await?;
            let claimed: Vec<Self> = response.take(0)?;

            if let Some(job) = claimed.into_iter().next() {
                info!(%worker_id, job_id = %job.id, attempt = job.attempts, "claimed job");
                return Ok(Some(job));
            }
            // Someone else won the race; try the next candidate.
        }

        Ok(None)
    }

    pub async fn succeed(db: &SurrealDbClient, job_id: &str) -> Result<(), AppError> {
        let response = db
            .client
            .query(
                "UPDATE type::thing('extraction_job', $job_id) SET \
                   status = 'DONE', updated_at = time::now();",
            )
            .bind(("job_id", job_id.to_owned()))
            .await
            .map_err(AppError::Database)?;
        response.check().map_err(AppError::Database)?;

        info!(%job_id, "job marked DONE");
        Ok(())
    }

    /// Record a failure. With `retry` and attempts left, the job returns to
    /// Pending with exponential backoff; otherwise it is terminal.
    pub async fn fail(
        db: &SurrealDbClient,
        job_id: &str,
        error_code: &str,
        error_message: &str,
        retry: bool,
    ) -> Result<(), AppError> {
        let Some(job) = db.get_item::<Self>(job_id).await? else {
            error!(%job_id, "job not found while recording failure");
            return Ok(());
        };

        if retry && job.attempts < job.max_attempts {
            let backoff = Self::backoff_seconds(job.attempts);
            let next_run_at =
                surrealdb::sql::Datetime::from(Utc::now() + Duration::seconds(backoff));
            let response = db
                .client
                .query(
                    "UPDATE type::thing('extraction_job', $job_id) SET \
                       status = 'PENDING', \
                       next_run_at = $next_run_at, \
                       locked_by = NONE, \
                       locked_at = NONE, \
                       last_error_code = $error_code, \
                       last_error_message = $error_message, \
                       updated_at = time::now();",
                )
                .bind(("job_id", job_id.to_owned()))
                .bind(("next_run_at", next_run_at))
                .bind(("error_code", error_code.to_owned()))
                .bind(("error_message", error_message.to_owned()))
                .await
                .map_err(AppError::Database)?;
            response.check().map_err(AppError::Database)?;

            info!(
                %job_id,
                backoff_s = backoff,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                "job retrying after failure"
            );
        } else {
            let response = db
                .client
                .query(
                    "UPDATE type::thing('extraction_job', $job_id) SET \
                       status = 'FAILED', \
                       last_error_code = $error_code, \
                       last_error_message = $error_message, \
                       updated_at = time::now();",
                )
                .bind(("job_id", job_id.to_owned()))
                .bind(("error_code", error_code.to_owned()))
                .bind(("error_message", error_message.to_owned()))
                .await
                .map_err(AppError::Database)?;
            response.check().map_err(AppError::Database)?;

            error!(%job_id, attempts = job.attempts, "job marked FAILED");
        }

        Ok(())
    }

    /// Supervisor sweep: return Processing jobs whose lock has gone stale to
    /// Pending so another worker can pick them up.
    pub async fn reset_stuck(
        db: &SurrealDbClient,
        stuck_threshold_s: i64,
    ) -> Result<usize, AppError> {
        let cutoff =
            surrealdb::sql::Datetime::from(Utc::now() - Duration::seconds(stuck_threshold_s));
        let mut response = db
            .query(
                "UPDATE extraction_job SET \
                   status = 'PENDING', \
                   locked_by = NONE, \
                   locked_at = NONE, \
                   updated_at = time::now() \
                 WHERE status = 'PROCESSING' AND locked_at < $cutoff \
                 RETURN AFTER",
            )
            .bind(("cutoff", cutoff))
            .await?;
        let reset: Vec<Self> = response.take(0)?;

        if !reset.is_empty() {
            info!(count = reset.len(), "reset stuck jobs to PENDING");
        }

        Ok(reset.len())
    }

    /// Re-enqueue extraction for a revision. A Done job needs `force`; a
    /// Processing job is left alone.
    pub async fn force_reextract(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
        force: bool,
        max_attempts: u32,
    ) -> Result<Self, AppError> {
        match Self::find_for_revision(db, artifact_uid, revision_id, JOB_TYPE_EXTRACT_EVENTS)
            .await?
        {
            Some(job) if job.status == JobStatus::Processing => Ok(job),
            Some(job) if job.status == JobStatus::Done && !force => Ok(job),
            Some(job) => {
                let response = db
                    .client
                    .query(
                        "UPDATE type::thing('extraction_job', $job_id) SET \
                           status = 'PENDING', \
                           attempts = 0, \
                           next_run_at = time::now(), \
                           locked_by = NONE, \
                           locked_at = NONE, \
                           last_error_code = NONE, \
                           last_error_message = NONE, \
                           updated_at = time::now();",
                    )
                    .bind(("job_id", job.id.clone()))
                    .await
                    .map_err(AppError::Database)?;
                response.check().map_err(AppError::Database)?;

                info!(job_id = %job.id, %artifact_uid, %revision_id, "job reset for re-extraction");
                db.get_item::<Self>(&job.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("job {} vanished", job.id)))
            }
            None => {
                Self::enqueue(
                    db,
                    artifact_uid,
                    revision_id,
                    JOB_TYPE_EXTRACT_EVENTS,
                    max_attempts,
                )
                .await
            }
        }
    }

    pub async fn queue_depth(db: &SurrealDbClient) -> Result<QueueDepth, AppError> {
        let mut response = db
            .query("SELECT count() FROM extraction_job WHERE status = 'PENDING' GROUP ALL")
            .await?;
        let counts: Vec<CountRow> = response.take(0)?;
        let pending = counts.into_iter().next().map_or(0, |row| row.count);

        let mut response = db
            .query(
                "SELECT * FROM extraction_job WHERE status = 'PENDING' \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .await?;
        let oldest: Vec<Self> = response.take(0)?;
        let oldest_pending_age_s = oldest
            .into_iter()
            .next()
            .map(|job| (Utc::now() - job.created_at).num_seconds().max(0));

        Ok(QueueDepth {
            pending,
            oldest_pending_age_s,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.build_indexes(3).await.expect("Failed to build indexes");
        db
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(ExtractionJob::backoff_seconds(0), 30);
        assert_eq!(ExtractionJob::backoff_seconds(1), 60);
        assert_eq!(ExtractionJob::backoff_seconds(2), 120);
        assert_eq!(ExtractionJob::backoff_seconds(4), 480);
        assert_eq!(ExtractionJob::backoff_seconds(5), 600);
        assert_eq!(ExtractionJob::backoff_seconds(12), 600);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_revision() {
        let db = setup().await;

        let first = ExtractionJob::enqueue(&db, "uid_a", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        let second = ExtractionJob::enqueue(&db, "uid_a", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        assert_eq!(first.id, second.id);

        let other = ExtractionJob::enqueue(&db, "uid_a", "rev_000002", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn claim_hands_out_each_job_once() {
        let db = setup().await;

        ExtractionJob::enqueue(&db, "uid_b", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");

        let claimed = ExtractionJob::claim(&db, "worker-1", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-1"));

        // The job is locked; a second worker sees an empty queue.
        let second = ExtractionJob::claim(&db, "worker-2", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_prefers_oldest_ready_job() {
        let db = setup().await;

        let older = ExtractionJob::enqueue(&db, "uid_c", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        ExtractionJob::enqueue(&db, "uid_c", "rev_000002", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");

        let claimed = ExtractionJob::claim(&db, "worker-1", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");
        assert_eq!(claimed.id, older.id);
    }

    #[tokio::test]
    async fn retryable_failure_requeues_with_backoff() {
        let db = setup().await;

        let job = ExtractionJob::enqueue(&db, "uid_d", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        let claimed = ExtractionJob::claim(&db, "worker-1", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");

        ExtractionJob::fail(&db, &claimed.id, "EXTRACTION_ERROR", "bad json", true)
            .await
            .expect("fail failed");

        let updated = db
            .get_item::<ExtractionJob>(&job.id)
            .await
            .expect("get failed")
            .expect("job missing");
        assert_eq!(updated.status, JobStatus::Pending);
        assert_eq!(updated.last_error_code.as_deref(), Some("EXTRACTION_ERROR"));
        assert!(updated.locked_by.is_none());
        assert!(updated.next_run_at > Utc::now());

        // Backed off into the future, so it is not immediately claimable.
        let next = ExtractionJob::claim(&db, "worker-1", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_are_terminal() {
        let db = setup().await;

        let job = ExtractionJob::enqueue(&db, "uid_e", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 1)
            .await
            .expect("enqueue failed");
        ExtractionJob::claim(&db, "worker-1", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");

        // attempts == max_attempts, so even a retryable failure is terminal.
        ExtractionJob::fail(&db, &job.id, "TIMEOUT", "deadline exceeded", true)
            .await
            .expect("fail failed");

        let updated = db
            .get_item::<ExtractionJob>(&job.id)
            .await
            .expect("get failed")
            .expect("job missing");
        assert_eq!(updated.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal() {
        let db = setup().await;

        let job = ExtractionJob::enqueue(&db, "uid_f", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        ExtractionJob::claim(&db, "worker-1", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");

        ExtractionJob::fail(&db, &job.id, "VALIDATION_ERROR", "whole batch invalid", false)
            .await
            .expect("fail failed");

        let updated = db
            .get_item::<ExtractionJob>(&job.id)
            .await
            .expect("get failed")
            .expect("job missing");
        assert_eq!(updated.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn stuck_jobs_return_to_pending() {
        let db = setup().await;

        ExtractionJob::enqueue(&db, "uid_g", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        ExtractionJob::claim(&db, "worker-crashed", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");

        // With a zero threshold every Processing job counts as stuck.
        let reset = ExtractionJob::reset_stuck(&db, 0).await.expect("reset failed");
        assert_eq!(reset, 1);

        let reclaimed = ExtractionJob::claim(&db, "worker-2", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed");
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn queue_depth_counts_pending() {
        let db = setup().await;

        let depth = ExtractionJob::queue_depth(&db).await.expect("depth failed");
        assert_eq!(depth.pending, 0);
        assert!(depth.oldest_pending_age_s.is_none());

        ExtractionJob::enqueue(&db, "uid_h", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        ExtractionJob::enqueue(&db, "uid_h", "rev_000002", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");

        let depth = ExtractionJob::queue_depth(&db).await.expect("depth failed");
        assert_eq!(depth.pending, 2);
        assert!(depth.oldest_pending_age_s.is_some());
    }

    #[tokio::test]
    async fn force_reextract_respects_done_without_force() {
        let db = setup().await;

        let job = ExtractionJob::enqueue(&db, "uid_i", "rev_000001", JOB_TYPE_EXTRACT_EVENTS, 5)
            .await
            .expect("enqueue failed");
        ExtractionJob::claim(&db, "worker-1", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");
        ExtractionJob::succeed(&db, &job.id).await.expect("succeed failed");

        let untouched = ExtractionJob::force_reextract(&db, "uid_i", "rev_000001", false, 5)
            .await
            .expect("force failed");
        assert_eq!(untouched.status, JobStatus::Done);

        let reset = ExtractionJob::force_reextract(&db, "uid_i", "rev_000001", true, 5)
            .await
            .expect("force failed");
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.attempts, 0);
    }

}
