use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::ArtifactRevision,
            entity_edge::EntityEdge,
            event_actor::EventActor,
            event_evidence::EventEvidence,
            event_subject::EventSubject,
            extraction_job::{ExtractionJob, JobStatus},
            semantic_event::{ActorRef, ActorRole, SemanticEvent, SubjectRef},
        },
        vector::{VectorCollection, VectorStore},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::{
    extractor::{
        merge_entities, merge_relationships, translate_offsets, validate_event, ChunkExtraction,
        ChunkSlice, EventExtractor, ExtractedEvent,
    },
    resolver::{EntityResolver, ResolverContext},
};

/// What became of a processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Committed,
    /// Another worker took the claim mid-run; nothing was written.
    ClaimLost,
}

/// Component I: claims extraction jobs, runs the LLM extractor over a
/// revision's chunks, resolves entities, and atomically replaces the
/// revision's event set.
pub struct ExtractionPipeline {
    db: Arc<SurrealDbClient>,
    vectors: VectorStore,
    embedder: Arc<EmbeddingProvider>,
    extractor: Arc<dyn EventExtractor>,
    resolver: EntityResolver,
}

impl ExtractionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        extractor: Arc<dyn EventExtractor>,
        config: &AppConfig,
    ) -> Self {
        let vectors = VectorStore::new(Arc::clone(&db));
        let resolver = EntityResolver::new(Arc::clone(&db), Arc::clone(&embedder), config);
        Self {
            db,
            vectors,
            embedder,
            extractor,
            resolver,
        }
    }

    /// Process a claimed job and record the outcome on the queue.
    pub async fn run_job(&self, job: ExtractionJob) {
        let job_id = job.id.clone();
        match self.process_job(&job).await {
            Ok(JobOutcome::ClaimLost) => {
                // The supervisor handed the job to someone else while we
                // worked; their run owns the row now.
                warn!(%job_id, "claim lost before commit; leaving job untouched");
            }
            Ok(JobOutcome::Committed) => {
                if let Err(err) = ExtractionJob::succeed(&self.db, &job_id).await {
                    warn!(%job_id, error = %err, "failed to mark job DONE");
                }
            }
            Err(err) => {
                warn!(%job_id, error = %err, "extraction job failed");
                if let Err(mark_err) = ExtractionJob::fail(
                    &self.db,
                    &job_id,
                    err.code().as_str(),
                    &err.to_string(),
                    err.retryable(),
                )
                .await
                {
                    warn!(%job_id, error = %mark_err, "failed to record job failure");
                }
            }
        }
    }

    pub async fn process_job(&self, job: &ExtractionJob) -> Result<JobOutcome, AppError> {
        let revision =
            ArtifactRevision::find_revision(&self.db, &job.artifact_uid, &job.revision_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "revision {}/{} not found",
                        job.artifact_uid, job.revision_id
                    ))
                })?;

        let slices = self.load_slices(&revision).await?;
        info!(
            job_id = %job.id,
            artifact_uid = %job.artifact_uid,
            revision_id = %job.revision_id,
            chunks = slices.len(),
            "extracting events"
        );

        // Per-chunk extraction, offsets shifted to revision-global.
        let mut per_chunk_events: Vec<Vec<ExtractedEvent>> = Vec::new();
        let mut per_chunk_entities = Vec::new();
        let mut per_chunk_relationships = Vec::new();
        for slice in &slices {
            let mut extraction: ChunkExtraction = self.extractor.extract_chunk(slice).await?;
            translate_offsets(&mut extraction, slice.start_char, slice.chunk_id.as_deref());
            per_chunk_events.push(extraction.events);
            per_chunk_entities.push(extraction.entities);
            per_chunk_relationships.push(extraction.relationships);
        }

        // Cross-chunk canonicalization, falling back to plain concatenation
        // when the canonicalizer cannot produce a clean merge.
        let canonical_events = if per_chunk_events.len() > 1 {
            match self.extractor.canonicalize_events(&per_chunk_events).await {
                Ok(events) => events,
                Err(err) => {
                    warn!(error = %err, "canonicalization failed; concatenating chunk events");
                    per_chunk_events.into_iter().flatten().collect()
                }
            }
        } else {
            per_chunk_events.into_iter().flatten().collect()
        };

        let mut valid_events = Vec::new();
        for mut event in canonical_events {
            event.category = SemanticEvent::normalize_category(&event.category);
            match validate_event(&event) {
                Ok(()) => valid_events.push(event),
                Err(reason) => warn!(%reason, narrative = %event.narrative, "dropping invalid event"),
            }
        }

        let entities = merge_entities(per_chunk_entities);
        let relationships = merge_relationships(per_chunk_relationships);

        // Resolve every mentioned entity, building a surface-form map that
        // covers canonical suggestions, surface forms and per-doc aliases.
        let ctx = ResolverContext {
            artifact_uid: job.artifact_uid.clone(),
            revision_id: job.revision_id.clone(),
            doc_title: revision.title.clone(),
        };
        let mut entity_map: HashMap<String, String> = HashMap::new();
        let mut alias_rows = Vec::new();
        let mut mention_rows = Vec::new();
        for entity in &entities {
            match self.resolver.resolve(entity, &ctx).await {
                Ok(resolved) => {
                    for form in std::iter::once(entity.surface_form.as_str())
                        .chain(std::iter::once(entity.canonical_suggestion.as_str()))
                        .chain(entity.aliases_in_doc.iter().map(String::as_str))
                    {
                        let key = form.trim().to_lowercase();
                        if !key.is_empty() {
                            entity_map.insert(key, resolved.entity_id.clone());
                        }
                    }
                    alias_rows.extend(resolved.alias_rows);
                    mention_rows.extend(resolved.mention_rows);
                }
                Err(err) => {
                    warn!(
                        surface_form = %entity.surface_form,
                        error = %err,
                        "entity resolution failed; refs stay textual"
                    );
                }
            }
        }

        // Distinct mentions can resolve to one entity and propose the same
        // alias; the unique index allows it only once.
        let mut seen_aliases = HashSet::new();
        alias_rows.retain(|row| {
            seen_aliases.insert((row.entity_id.clone(), row.surface_form.to_lowercase()))
        });

        // Narrative embeddings, batched.
        let narratives: Vec<String> = valid_events.iter().map(|e| e.narrative.clone()).collect();
        let embeddings = if narratives.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&narratives).await?
        };

        let (events, evidence, actors, subjects) =
            build_rows(&valid_events, embeddings, &entity_map, job);

        // The claim may have been reset by the supervisor during a long
        // extraction; commit only while we still hold it.
        if !self.claim_still_held(job).await? {
            return Ok(JobOutcome::ClaimLost);
        }

        SemanticEvent::replace_for_revision(
            &self.db,
            &job.artifact_uid,
            &job.revision_id,
            events,
            evidence,
            actors,
            subjects,
            alias_rows,
            mention_rows,
        )
        .await?;

        // Explicit entity edges, merged on conflict.
        let mut edges_stored = 0;
        for relationship in &relationships {
            let source = entity_map.get(&relationship.source_entity.to_lowercase());
            let target = entity_map.get(&relationship.target_entity.to_lowercase());
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            if source == target {
                continue;
            }

            let edge = EntityEdge {
                id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                source_entity_id: source.clone(),
                target_entity_id: target.clone(),
                relationship_type: relationship.relationship_type.to_uppercase(),
                artifact_uid: job.artifact_uid.clone(),
                revision_id: job.revision_id.clone(),
                confidence: relationship.confidence,
                evidence_quote: relationship.evidence_quote.clone(),
            };
            match edge.upsert_merge(&self.db).await {
                Ok(()) => edges_stored += 1,
                Err(err) => warn!(
                    source = %relationship.source_entity,
                    target = %relationship.target_entity,
                    error = %err,
                    "failed to store entity edge"
                ),
            }
        }

        info!(
            job_id = %job.id,
            events = valid_events.len(),
            entities = entities.len(),
            edges = edges_stored,
            "extraction committed"
        );

        Ok(JobOutcome::Committed)
    }

    async fn claim_still_held(&self, job: &ExtractionJob) -> Result<bool, AppError> {
        let current = self.db.get_item::<ExtractionJob>(&job.id).await?;
        Ok(matches!(
            current,
            Some(row) if row.status == JobStatus::Processing && row.locked_by == job.locked_by
        ))
    }

    /// Revision text in index order: either the single content record or
    /// every chunk record.
    async fn load_slices(&self, revision: &ArtifactRevision) -> Result<Vec<ChunkSlice>, AppError> {
        if !revision.is_chunked {
            let record = self
                .vectors
                .get(VectorCollection::Content, &revision.artifact_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "artifact {} missing from content collection",
                        revision.artifact_id
                    ))
                })?;
            return Ok(vec![ChunkSlice {
                content: record.text,
                chunk_index: 0,
                chunk_id: None,
                start_char: 0,
            }]);
        }

        let chunks = self.vectors.chunks_for_artifact(&revision.artifact_id).await?;
        if chunks.len() != revision.chunk_count {
            warn!(
                artifact_id = %revision.artifact_id,
                expected = revision.chunk_count,
                found = chunks.len(),
                "chunk count mismatch"
            );
        }
        if chunks.is_empty() {
            return Err(AppError::NotFound(format!(
                "artifact {} has no chunks in the chunks collection",
                revision.artifact_id
            )));
        }

        Ok(chunks
            .into_iter()
            .map(|record| ChunkSlice {
                content: record.text,
                chunk_index: record.chunk_index.unwrap_or(0),
                chunk_id: Some(record.id),
                start_char: record.start_char.unwrap_or(0),
            })
            .collect())
    }
}

type CommitRows = (
    Vec<SemanticEvent>,
    Vec<EventEvidence>,
    Vec<EventActor>,
    Vec<EventSubject>,
);

/// Turn validated extractions into the rows of the atomic commit. Actor and
/// subject refs that did not resolve are skipped; the text still carries
/// them via evidence.
fn build_rows(
    valid_events: &[ExtractedEvent],
    embeddings: Vec<Vec<f32>>,
    entity_map: &HashMap<String, String>,
    job: &ExtractionJob,
) -> CommitRows {
    let now = Utc::now();
    let mut events = Vec::new();
    let mut evidence_rows = Vec::new();
    let mut actor_rows: Vec<EventActor> = Vec::new();
    let mut subject_rows = Vec::new();

    for (index, event) in valid_events.iter().enumerate() {
        let event_id = Uuid::new_v4().to_string();

        let subject = event
            .subject
            .clone()
            .map(|subject| SubjectRef {
                kind: if subject.kind.is_empty() {
                    "other".to_string()
                } else {
                    subject.kind
                },
                reference: subject.reference,
            })
            .unwrap_or_else(|| SubjectRef {
                kind: "other".to_string(),
                reference: String::new(),
            });

        let actors: Vec<ActorRef> = event
            .actors
            .iter()
            .map(|actor| ActorRef {
                reference: actor.reference.clone(),
                role: ActorRole::parse(actor.role.as_deref().unwrap_or("other")),
            })
            .collect();

        for span in &event.evidence {
            evidence_rows.push(EventEvidence {
                id: Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                event_id: event_id.clone(),
                artifact_uid: job.artifact_uid.clone(),
                revision_id: job.revision_id.clone(),
                chunk_id: span.chunk_id.clone(),
                start_char: span.start_char,
                end_char: span.end_char,
                quote: span.quote.clone(),
            });
        }

        let mut linked: HashSet<String> = HashSet::new();
        for actor in &actors {
            if let Some(entity_id) = entity_map.get(&actor.reference.to_lowercase()) {
                if linked.insert(entity_id.clone()) {
                    actor_rows.push(EventActor {
                        id: Uuid::new_v4().to_string(),
                        created_at: now,
                        updated_at: now,
                        event_id: event_id.clone(),
                        entity_id: entity_id.clone(),
                        role: actor.role,
                    });
                }
            }
        }
        if let Some(entity_id) = entity_map.get(&subject.reference.to_lowercase()) {
            if !linked.contains(entity_id) {
                subject_rows.push(EventSubject {
                    id: Uuid::new_v4().to_string(),
                    created_at: now,
                    updated_at: now,
                    event_id: event_id.clone(),
                    entity_id: entity_id.clone(),
                });
            }
        }

        events.push(SemanticEvent {
            id: event_id,
            created_at: now,
            updated_at: now,
            artifact_uid: job.artifact_uid.clone(),
            revision_id: job.revision_id.clone(),
            category: event.category.clone(),
            narrative: event.narrative.clone(),
            event_time: parse_event_time(event.event_time.as_deref()),
            subject,
            actors,
            confidence: event.confidence,
            embedding: embeddings.get(index).cloned().unwrap_or_default(),
            extraction_run_id: job.id.clone(),
        });
    }

    (events, evidence_rows, actor_rows, subject_rows)
}

/// Lenient event-time parsing: full RFC3339 or a bare date; anything else is
/// dropped with a warning rather than failing the event.
fn parse_event_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    warn!(event_time = %raw, "unparseable event_time dropped");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::storage::types::extraction_job::JOB_TYPE_EXTRACT_EVENTS;
    use common::utils::chunking::{test_support::word_tokenizer, Chunker};
    use common::utils::embedding::EmbeddingProvider;

    use crate::extractor::{
        ContextClues, ExtractedActor, ExtractedEntity, ExtractedEvidence, ExtractedRelationship,
        ExtractedSubject,
    };
    use crate::ingest::{ArtifactIngestor, RememberRequest};

    struct ScriptedExtractor {
        extraction: ChunkExtraction,
    }

    #[async_trait]
    impl EventExtractor for ScriptedExtractor {
        async fn extract_chunk(&self, _chunk: &ChunkSlice) -> Result<ChunkExtraction, AppError> {
            Ok(self.extraction.clone())
        }

        async fn canonicalize_events(
            &self,
            per_chunk: &[Vec<ExtractedEvent>],
        ) -> Result<Vec<ExtractedEvent>, AppError> {
            Ok(per_chunk.iter().flatten().cloned().collect())
        }
    }

    fn decision_extraction() -> ChunkExtraction {
        ChunkExtraction {
            events: vec![ExtractedEvent {
                // Raw category exercises normalization on the way in.
                category: "decisions".to_string(),
                narrative: "Alice decided to ship on April 1st".to_string(),
                event_time: Some("2024-04-01".to_string()),
                subject: Some(ExtractedSubject {
                    kind: "project".to_string(),
                    reference: "launch".to_string(),
                }),
                actors: vec![ExtractedActor {
                    reference: "Alice".to_string(),
                    role: Some("owner".to_string()),
                }],
                confidence: 0.95,
                evidence: vec![ExtractedEvidence {
                    quote: "Alice decided to ship".to_string(),
                    start_char: 0,
                    end_char: 21,
                    chunk_id: None,
                }],
            }],
            entities: vec![ExtractedEntity {
                surface_form: "Alice".to_string(),
                canonical_suggestion: "Alice".to_string(),
                entity_type: "person".to_string(),
                context_clues: ContextClues {
                    role: Some("PM".to_string()),
                    org: Some("Acme".to_string()),
                    email: None,
                },
                aliases_in_doc: Vec::new(),
                confidence: 0.9,
                start_char: Some(0),
                end_char: Some(5),
                chunk_id: None,
            }],
            relationships: vec![ExtractedRelationship {
                source_entity: "Alice".to_string(),
                target_entity: "Acme".to_string(),
                relationship_type: "works_at".to_string(),
                confidence: 0.85,
                evidence_quote: Some("Alice of Acme".to_string()),
            }],
        }
    }

    fn acme_entity() -> ExtractedEntity {
        ExtractedEntity {
            surface_form: "Acme".to_string(),
            canonical_suggestion: "Acme Corp".to_string(),
            entity_type: "org".to_string(),
            context_clues: ContextClues::default(),
            aliases_in_doc: Vec::new(),
            confidence: 0.9,
            start_char: Some(30),
            end_char: Some(34),
            chunk_id: None,
        }
    }

    struct Harness {
        db: Arc<SurrealDbClient>,
        ingestor: ArtifactIngestor,
        embedder: Arc<EmbeddingProvider>,
    }

    async fn setup() -> Harness {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.build_indexes(64).await.expect("Failed to build indexes");
        let embedder = Arc::new(EmbeddingProvider::deterministic(64));
        let config = AppConfig::default();
        let chunker = Chunker::new(word_tokenizer(), 1200, 900, 100).expect("invalid chunker");
        let ingestor = ArtifactIngestor::new(
            Arc::clone(&db),
            Arc::clone(&embedder),
            chunker,
            config,
        );
        Harness {
            db,
            ingestor,
            embedder,
        }
    }

    fn pipeline_with(harness: &Harness, extraction: ChunkExtraction) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Arc::clone(&harness.db),
            Arc::clone(&harness.embedder),
            Arc::new(ScriptedExtractor { extraction }),
            &AppConfig::default(),
        )
    }

    async fn ingest_note(harness: &Harness, content: &str, source_id: &str, title: &str) -> (String, String) {
        let outcome = harness
            .ingestor
            .remember(RememberRequest {
                content: content.to_string(),
                context: "note".to_string(),
                title: Some(title.to_string()),
                source_system: Some("test".to_string()),
                source_id: Some(source_id.to_string()),
                source_ts: None,
                document_date: None,
                author: None,
                participants: Vec::new(),
                sensitivity: None,
                visibility_scope: None,
                retention_policy: None,
            })
            .await
            .expect("remember failed");
        (outcome.artifact_uid, outcome.revision_id)
    }

    #[tokio::test]
    async fn extraction_commits_events_entities_and_edges() {
        let harness = setup().await;
        let mut extraction = decision_extraction();
        extraction.entities.push(acme_entity());
        let pipeline = pipeline_with(&harness, extraction);

        let (uid, _rev) = ingest_note(
            &harness,
            "Alice decided to ship on April 1st. Alice of Acme.",
            "note-1",
            "ship decision",
        )
        .await;

        let job = ExtractionJob::claim(&harness.db, "worker-test", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");
        pipeline.run_job(job.clone()).await;

        let finished = harness
            .db
            .get_item::<ExtractionJob>(&job.id)
            .await
            .expect("get failed")
            .expect("job missing");
        assert_eq!(finished.status, common::storage::types::extraction_job::JobStatus::Done);

        let events = SemanticEvent::events_for_revision(&harness.db, &uid, "rev_000001")
            .await
            .expect("fetch failed");
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.category, "Decision");
        assert_eq!(event.extraction_run_id, job.id);
        assert!(event.event_time.is_some());
        assert!(!event.embedding.is_empty());

        // Evidence quote is a substring of the stored content.
        let evidence = SemanticEvent::evidence_for_events(&harness.db, &[event.id.clone()])
            .await
            .expect("evidence fetch failed");
        let spans = evidence.get(&event.id).expect("no evidence");
        assert_eq!(spans.len(), 1);
        assert!("Alice decided to ship on April 1st. Alice of Acme."
            .contains(&spans[0].quote));

        // The actor ref resolved to exactly one entity.
        let actor_rows = EventActor::for_events(&harness.db, &[event.id.clone()])
            .await
            .expect("actor fetch failed");
        assert_eq!(actor_rows.len(), 1);
        assert_eq!(actor_rows[0].role, ActorRole::Owner);

        // The Alice->Acme relationship became a typed edge.
        let edges = EntityEdge::for_entities(&harness.db, &[actor_rows[0].entity_id.clone()], &[])
            .await
            .expect("edge fetch failed");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relationship_type, "WORKS_AT");
    }

    #[tokio::test]
    async fn rerunning_extraction_replaces_rather_than_duplicates() {
        let harness = setup().await;
        let pipeline = pipeline_with(&harness, decision_extraction());

        let (uid, rev) = ingest_note(
            &harness,
            "Alice decided to ship on April 1st.",
            "note-2",
            "ship decision",
        )
        .await;

        let job = ExtractionJob::claim(&harness.db, "worker-test", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");
        pipeline.run_job(job.clone()).await;

        let first_run = SemanticEvent::events_for_revision(&harness.db, &uid, &rev)
            .await
            .expect("fetch failed");
        assert_eq!(first_run.len(), 1);

        // Force a second run of the same revision.
        let reset = ExtractionJob::force_reextract(&harness.db, &uid, &rev, true, 5)
            .await
            .expect("force failed");
        let job = ExtractionJob::claim(&harness.db, "worker-test", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");
        assert_eq!(job.id, reset.id);
        pipeline.run_job(job).await;

        let second_run = SemanticEvent::events_for_revision(&harness.db, &uid, &rev)
            .await
            .expect("fetch failed");
        assert_eq!(second_run.len(), 1);
        assert_ne!(second_run[0].id, first_run[0].id);
    }

    #[tokio::test]
    async fn events_about_the_same_person_share_an_entity() {
        let harness = setup().await;
        let pipeline = pipeline_with(&harness, decision_extraction());

        let (uid_a, _) = ingest_note(
            &harness,
            "Alice decided to ship on April 1st.",
            "note-3",
            "planning",
        )
        .await;
        let (uid_b, _) = ingest_note(
            &harness,
            "Alice decided to ship the beta next.",
            "note-4",
            "planning",
        )
        .await;

        for _ in 0..2 {
            let job = ExtractionJob::claim(&harness.db, "worker-test", JOB_TYPE_EXTRACT_EVENTS)
                .await
                .expect("claim failed")
                .expect("expected a job");
            pipeline.run_job(job).await;
        }

        let events_a = SemanticEvent::events_for_revision(&harness.db, &uid_a, "rev_000001")
            .await
            .expect("fetch failed");
        let events_b = SemanticEvent::events_for_revision(&harness.db, &uid_b, "rev_000001")
            .await
            .expect("fetch failed");
        let actors_a = EventActor::for_events(&harness.db, &[events_a[0].id.clone()])
            .await
            .expect("actor fetch failed");
        let actors_b = EventActor::for_events(&harness.db, &[events_b[0].id.clone()])
            .await
            .expect("actor fetch failed");

        assert_eq!(actors_a[0].entity_id, actors_b[0].entity_id);
    }

    #[tokio::test]
    async fn invalid_events_are_dropped_not_fatal() {
        let harness = setup().await;
        let mut extraction = decision_extraction();
        extraction.events.push(ExtractedEvent {
            category: String::new(),
            narrative: "broken event".to_string(),
            event_time: None,
            subject: None,
            actors: Vec::new(),
            confidence: 2.0,
            evidence: Vec::new(),
        });
        let pipeline = pipeline_with(&harness, extraction);

        let (uid, rev) = ingest_note(
            &harness,
            "Alice decided to ship on April 1st.",
            "note-5",
            "planning",
        )
        .await;

        let job = ExtractionJob::claim(&harness.db, "worker-test", JOB_TYPE_EXTRACT_EVENTS)
            .await
            .expect("claim failed")
            .expect("expected a job");
        pipeline.run_job(job).await;

        let events = SemanticEvent::events_for_revision(&harness.db, &uid, &rev)
            .await
            .expect("fetch failed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, "Decision");
    }

    #[test]
    fn event_time_parsing_is_lenient() {
        assert!(parse_event_time(Some("2024-04-01T12:00:00Z")).is_some());
        assert!(parse_event_time(Some("2024-04-01")).is_some());
        assert!(parse_event_time(Some("next tuesday")).is_none());
        assert!(parse_event_time(None).is_none());
    }
}
