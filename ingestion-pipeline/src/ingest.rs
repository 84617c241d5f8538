use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::{ArtifactRevision, ArtifactType, Sensitivity, VisibilityScope},
            entity_edge::EntityEdge,
            entity_mention::EntityMention,
            extraction_job::{ExtractionJob, JobStatus, JOB_TYPE_EXTRACT_EVENTS},
            semantic_event::SemanticEvent,
        },
        vector::{VectorCollection, VectorRecord, VectorStore},
    },
    utils::{chunking::Chunker, config::AppConfig, embedding::EmbeddingProvider},
};

/// Default logical source when the caller does not name one.
const DEFAULT_SOURCE_SYSTEM: &str = "mcp";

/// Arguments to `remember`, matching the tool-call surface.
#[derive(Debug, Clone, Deserialize)]
pub struct RememberRequest {
    pub content: String,
    /// Artifact type: email, doc, chat, transcript or note.
    pub context: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_ts: Option<String>,
    #[serde(default)]
    pub document_date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub sensitivity: Option<String>,
    #[serde(default)]
    pub visibility_scope: Option<String>,
    #[serde(default)]
    pub retention_policy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RememberStatus {
    Stored,
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct RememberOutcome {
    pub artifact_uid: String,
    pub artifact_id: String,
    pub revision_id: String,
    pub status: RememberStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub token_count: usize,
    pub is_chunked: bool,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForgetOutcome {
    pub artifact_uid: String,
    pub revisions_deleted: usize,
    pub vector_entries_deleted: usize,
    pub events_deleted: usize,
    pub evidence_deleted: usize,
    pub mentions_deleted: usize,
    pub edges_deleted: usize,
    pub jobs_deleted: usize,
}

/// Component F: durable write-once revisions with content-hash dedup, the
/// two-phase atomic write across both stores, and job enqueue. Also the
/// inverse cascade for `forget`.
pub struct ArtifactIngestor {
    db: Arc<SurrealDbClient>,
    vectors: VectorStore,
    embedder: Arc<EmbeddingProvider>,
    chunker: Chunker,
    config: AppConfig,
}

impl ArtifactIngestor {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        chunker: Chunker,
        config: AppConfig,
    ) -> Self {
        let vectors = VectorStore::new(Arc::clone(&db));
        Self {
            db,
            vectors,
            embedder,
            chunker,
            config,
        }
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub async fn remember(&self, request: RememberRequest) -> Result<RememberOutcome, AppError> {
        // Validation first: nothing below may run with bad input.
        let content = canonicalize_content(&request.content);
        if content.trim().is_empty() {
            return Err(AppError::Validation("content must not be empty".into()));
        }
        let artifact_type = ArtifactType::parse(&request.context).ok_or_else(|| {
            AppError::Validation(format!(
                "unknown context '{}'; expected one of email, doc, chat, transcript, note",
                request.context
            ))
        })?;
        let sensitivity = match request.sensitivity.as_deref() {
            None => Sensitivity::default(),
            Some(raw) => Sensitivity::parse(raw).ok_or_else(|| {
                AppError::Validation(format!(
                    "unknown sensitivity '{raw}'; expected normal or sensitive"
                ))
            })?,
        };
        let visibility_scope = match request.visibility_scope.as_deref() {
            None => VisibilityScope::default(),
            Some(raw) => VisibilityScope::parse(raw).ok_or_else(|| {
                AppError::Validation(format!(
                    "unknown visibility_scope '{raw}'; expected me, team or public"
                ))
            })?,
        };
        let source_ts = parse_instant(request.source_ts.as_deref())?;

        let content_hash = format!("{:x}", Sha256::digest(content.as_bytes()));
        let artifact_id = format!("art_{}", &content_hash[..12]);
        let source_system = request
            .source_system
            .clone()
            .unwrap_or_else(|| DEFAULT_SOURCE_SYSTEM.to_string());
        let source_id = request.source_id.clone().unwrap_or_else(|| content_hash.clone());

        // Resolve the logical identity and deduplicate against its latest
        // revision.
        let existing = ArtifactRevision::find_by_source(&self.db, &source_system, &source_id).await?;
        let artifact_uid = existing
            .as_ref()
            .map(|revision| revision.artifact_uid.clone())
            .unwrap_or_else(ArtifactRevision::mint_uid);

        if let Some(latest) = ArtifactRevision::latest_for_uid(&self.db, &artifact_uid).await? {
            if latest.content_hash == content_hash {
                // Identical content: no new revision, no new job. A missing
                // job (an earlier enqueue failure) is repaired here thanks to
                // queue idempotence.
                let job = ExtractionJob::enqueue(
                    &self.db,
                    &artifact_uid,
                    &latest.revision_id,
                    JOB_TYPE_EXTRACT_EVENTS,
                    self.config.event_max_attempts,
                )
                .await?;

                info!(%artifact_uid, revision_id = %latest.revision_id, "content unchanged");
                return Ok(RememberOutcome {
                    artifact_uid,
                    artifact_id: latest.artifact_id.clone(),
                    revision_id: latest.revision_id.clone(),
                    status: RememberStatus::Unchanged,
                    job_id: Some(job.id),
                    token_count: latest.token_count,
                    is_chunked: latest.is_chunked,
                    chunk_count: latest.chunk_count,
                });
            }
        }

        let revision_seq = ArtifactRevision::count_revisions(&self.db, &artifact_uid).await? as u32 + 1;
        let revision_id = ArtifactRevision::revision_label(revision_seq);

        let (_, token_count) = self.chunker.should_chunk(&content)?;
        let chunks = self.chunker.chunk(&content, &artifact_id)?;
        let is_chunked = !chunks.is_empty();
        let chunk_count = chunks.len();

        // Phase 1: every embedding up front. A provider failure aborts with
        // no writes anywhere.
        let ingested_at = Utc::now();
        let mut content_records = Vec::new();
        let mut chunk_records = Vec::new();
        if is_chunked {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            for (chunk, embedding) in chunks.iter().zip(embeddings) {
                chunk_records.push(VectorRecord {
                    id: chunk.chunk_id.clone(),
                    text: chunk.content.clone(),
                    embedding,
                    artifact_id: artifact_id.clone(),
                    artifact_uid: artifact_uid.clone(),
                    revision_id: revision_id.clone(),
                    chunk_index: Some(chunk.chunk_index),
                    start_char: Some(chunk.start_char),
                    end_char: Some(chunk.end_char),
                    token_count: chunk.token_count,
                    content_hash: chunk.content_hash.clone(),
                    title: request.title.clone(),
                    sensitivity: sensitivity.as_str().to_string(),
                    visibility_scope: visibility_scope.as_str().to_string(),
                    ingested_at,
                });
            }
        } else {
            let embedding = self.embedder.embed(&content).await?;
            content_records.push(VectorRecord {
                id: artifact_id.clone(),
                text: content.clone(),
                embedding,
                artifact_id: artifact_id.clone(),
                artifact_uid: artifact_uid.clone(),
                revision_id: revision_id.clone(),
                chunk_index: None,
                start_char: None,
                end_char: None,
                token_count,
                content_hash: content_hash.clone(),
                title: request.title.clone(),
                sensitivity: sensitivity.as_str().to_string(),
                visibility_scope: visibility_scope.as_str().to_string(),
                ingested_at,
            });
        }

        // Phase 2a: vector upserts under content-addressed ids.
        let content_ids: Vec<String> = content_records.iter().map(|r| r.id.clone()).collect();
        let chunk_ids: Vec<String> = chunk_records.iter().map(|r| r.id.clone()).collect();
        self.vectors
            .upsert(VectorCollection::Content, content_records)
            .await?;
        self.vectors
            .upsert(VectorCollection::Chunks, chunk_records)
            .await?;

        // Phase 2b: the relational revision row, demoting the prior latest.
        let previous_latest = ArtifactRevision::latest_for_uid(&self.db, &artifact_uid).await?;
        let revision = ArtifactRevision {
            id: Uuid::new_v4().to_string(),
            created_at: ingested_at,
            updated_at: ingested_at,
            artifact_uid: artifact_uid.clone(),
            revision_id: revision_id.clone(),
            revision_seq,
            artifact_id: artifact_id.clone(),
            content_hash: content_hash.clone(),
            artifact_type,
            source_system,
            source_id,
            source_ts,
            title: request.title.clone(),
            document_date: request.document_date.clone(),
            author: request.author.clone(),
            participants: request.participants.clone(),
            sensitivity,
            visibility_scope,
            retention_policy: request.retention_policy.clone(),
            token_count,
            is_chunked,
            chunk_count,
            is_latest: true,
            ingested_at,
        };

        if let Err(err) = revision.insert_as_latest(&self.db).await {
            self.compensate_vectors(&content_ids, &chunk_ids).await;
            return Err(AppError::Storage(format!(
                "failed to commit revision row: {err}"
            )));
        }

        // Phase 2c: enqueue extraction for the new revision. A failure here
        // unwinds the whole phase: vector entries and the revision row must
        // not outlive a missing job.
        let job = match ExtractionJob::enqueue(
            &self.db,
            &artifact_uid,
            &revision_id,
            JOB_TYPE_EXTRACT_EVENTS,
            self.config.event_max_attempts,
        )
        .await
        {
            Ok(job) => job,
            Err(err) => {
                self.compensate_vectors(&content_ids, &chunk_ids).await;
                self.rollback_revision(&revision, previous_latest.as_ref())
                    .await;
                return Err(AppError::Storage(format!(
                    "failed to enqueue extraction job: {err}"
                )));
            }
        };

        // The vector store only carries the latest revision; drop the
        // superseded revision's entries now that the new one is committed.
        if let Some(previous) = previous_latest {
            if previous.artifact_id != artifact_id {
                if let Err(err) = self.vectors.delete_artifact(&previous.artifact_id).await {
                    warn!(
                        artifact_id = %previous.artifact_id,
                        error = %err,
                        "failed to drop superseded revision vectors"
                    );
                }
            }
        }

        info!(
            %artifact_uid,
            %artifact_id,
            %revision_id,
            token_count,
            chunk_count,
            job_id = %job.id,
            "artifact revision stored"
        );

        Ok(RememberOutcome {
            artifact_uid,
            artifact_id,
            revision_id,
            status: RememberStatus::Stored,
            job_id: Some(job.id),
            token_count,
            is_chunked,
            chunk_count,
        })
    }

    /// Cascade-delete an artifact identified by `art_…` content id or by
    /// its uid. Entities survive; everything scoped to the artifact goes.
    pub async fn forget(&self, id: &str, confirm: bool) -> Result<ForgetOutcome, AppError> {
        if !confirm {
            return Err(AppError::Validation(
                "forget requires confirm = true".into(),
            ));
        }

        let artifact_uid = if id.starts_with("art_") {
            ArtifactRevision::find_by_artifact_id(&self.db, id, None)
                .await?
                .map(|revision| revision.artifact_uid)
                .ok_or_else(|| AppError::NotFound(format!("artifact {id} not found")))?
        } else {
            ArtifactRevision::latest_for_uid(&self.db, id)
                .await?
                .map(|revision| revision.artifact_uid)
                .ok_or_else(|| AppError::NotFound(format!("artifact {id} not found")))?
        };

        let mut response = self
            .db
            .query("SELECT * FROM artifact_revision WHERE artifact_uid = $artifact_uid")
            .bind(("artifact_uid", artifact_uid.clone()))
            .await?;
        let revisions: Vec<ArtifactRevision> = response.take(0)?;

        let mut vector_entries_deleted = 0;
        let mut events_deleted = 0;
        let mut evidence_deleted = 0;
        let mut mentions_deleted = 0;

        for revision in &revisions {
            vector_entries_deleted += self.vectors.delete_artifact(&revision.artifact_id).await?;
            let (events, evidence) =
                SemanticEvent::delete_for_revision(&self.db, &artifact_uid, &revision.revision_id)
                    .await?;
            events_deleted += events;
            evidence_deleted += evidence;
            mentions_deleted +=
                EntityMention::delete_for_revision(&self.db, &artifact_uid, &revision.revision_id)
                    .await?;
        }

        let edges_deleted = EntityEdge::delete_for_artifact(&self.db, &artifact_uid).await?;

        let mut response = self
            .db
            .query("DELETE extraction_job WHERE artifact_uid = $artifact_uid RETURN BEFORE")
            .bind(("artifact_uid", artifact_uid.clone()))
            .await?;
        let jobs: Vec<ExtractionJob> = response.take(0)?;

        let mut response = self
            .db
            .query("DELETE artifact_revision WHERE artifact_uid = $artifact_uid RETURN BEFORE")
            .bind(("artifact_uid", artifact_uid.clone()))
            .await?;
        let deleted_revisions: Vec<ArtifactRevision> = response.take(0)?;

        info!(
            %artifact_uid,
            revisions = deleted_revisions.len(),
            events = events_deleted,
            "artifact forgotten"
        );

        Ok(ForgetOutcome {
            artifact_uid,
            revisions_deleted: deleted_revisions.len(),
            vector_entries_deleted,
            events_deleted,
            evidence_deleted,
            mentions_deleted,
            edges_deleted,
            jobs_deleted: jobs.len(),
        })
    }

    /// Extraction job state for an artifact, used by `status`-style queries.
    pub async fn job_state(
        &self,
        artifact_uid: &str,
        revision_id: Option<&str>,
    ) -> Result<Option<JobStatus>, AppError> {
        let revision_id = match revision_id {
            Some(revision_id) => revision_id.to_string(),
            None => match ArtifactRevision::latest_for_uid(&self.db, artifact_uid).await? {
                Some(latest) => latest.revision_id,
                None => return Ok(None),
            },
        };

        Ok(ExtractionJob::find_for_revision(
            &self.db,
            artifact_uid,
            &revision_id,
            JOB_TYPE_EXTRACT_EVENTS,
        )
        .await?
        .map(|job| job.status))
    }

    /// Undo a committed revision row after a later phase-2 step failed:
    /// delete the row and hand `is_latest` back to the prior revision. Runs
    /// to completion or logs a permanent reconciliation warning.
    async fn rollback_revision(
        &self,
        revision: &ArtifactRevision,
        previous_latest: Option<&ArtifactRevision>,
    ) {
        if let Err(err) = self.db.delete_item::<ArtifactRevision>(&revision.id).await {
            error!(
                revision_record_id = %revision.id,
                artifact_uid = %revision.artifact_uid,
                error = %err,
                "reconciliation needed: orphaned revision row could not be deleted"
            );
            return;
        }

        let Some(previous) = previous_latest else {
            return;
        };
        let restored = self
            .db
            .client
            .query(
                "UPDATE type::thing('artifact_revision', $revision_record_id) SET \
                   is_latest = true, updated_at = time::now();",
            )
            .bind(("revision_record_id", previous.id.clone()))
            .await
            .and_then(surrealdb::Response::check);
        if let Err(err) = restored {
            error!(
                revision_record_id = %previous.id,
                artifact_uid = %previous.artifact_uid,
                error = %err,
                "reconciliation needed: previous latest revision could not be restored"
            );
        }
    }

    /// Best-effort removal of vector entries that cannot be paired with a
    /// committed relational row. Runs to completion or logs a permanent
    /// reconciliation warning.
    async fn compensate_vectors(&self, content_ids: &[String], chunk_ids: &[String]) {
        if let Err(err) = self
            .vectors
            .delete_ids(VectorCollection::Content, content_ids.to_vec())
            .await
        {
            error!(
                error = %err,
                ids = ?content_ids,
                "reconciliation needed: orphaned content vectors could not be deleted"
            );
        }
        if let Err(err) = self
            .vectors
            .delete_ids(VectorCollection::Chunks, chunk_ids.to_vec())
            .await
        {
            error!(
                error = %err,
                ids = ?chunk_ids,
                "reconciliation needed: orphaned chunk vectors could not be deleted"
            );
        }
    }
}

/// Line endings normalized and trailing whitespace dropped, so the same
/// logical text always hashes to the same artifact id.
fn canonicalize_content(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim_end().to_string()
}

fn parse_instant(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw {
        None => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                AppError::Validation(format!("source_ts '{value}' is not an RFC3339 instant"))
            }),
    }
}
