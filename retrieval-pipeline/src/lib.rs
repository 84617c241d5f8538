pub mod fusion;
pub mod graph;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::ArtifactRevision,
            entity::Entity,
            entity_edge::EntityEdge,
            semantic_event::{ActorRef, SemanticEvent, SubjectRef},
        },
        vector::{VectorCollection, VectorStore},
    },
    utils::{
        chunking::{expand_neighbors, ChunkPiece},
        config::AppConfig,
        embedding::EmbeddingProvider,
    },
};

use fusion::{artifact_key, dedupe_by_artifact, fuse_indices, FusedHit};
use graph::{expand, GraphWeights, RelatedArtifact};

/// Arguments to `recall`, matching the tool-call surface.
#[derive(Debug, Clone, Deserialize)]
pub struct RecallRequest {
    #[serde(default)]
    pub query: Option<String>,
    /// Single-artifact mode: fetch by `art_…` id or artifact uid instead of
    /// searching.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_expand")]
    pub expand: bool,
    #[serde(default)]
    pub include_events: bool,
    #[serde(default)]
    pub include_entities: bool,
    #[serde(default)]
    pub include_edges: bool,
    #[serde(default)]
    pub edge_types: Option<Vec<String>>,
    #[serde(default)]
    pub graph_budget: Option<usize>,
}

fn default_limit() -> usize {
    10
}

fn default_expand() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceView {
    pub quote: String,
    pub start_char: usize,
    pub end_char: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub event_id: String,
    pub category: String,
    pub narrative: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    pub subject: SubjectRef,
    pub actors: Vec<ActorRef>,
    pub confidence: f32,
    pub evidence: Vec<EvidenceView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub entity_id: String,
    pub entity_type: String,
    pub canonical_name: String,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeView {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    pub artifact_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub score: f32,
    /// Which index produced the representative: `chunk` or `content`.
    pub matched: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<EventView>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub results: Vec<RecallResult>,
    pub related: Vec<RelatedArtifact>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeView>,
}

/// Component J: hybrid retrieval over the vector collections with
/// reciprocal-rank fusion, artifact/chunk dedup, neighbor expansion and
/// graph expansion for related context.
pub struct RecallEngine {
    db: Arc<SurrealDbClient>,
    vectors: VectorStore,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl RecallEngine {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>, config: AppConfig) -> Self {
        let vectors = VectorStore::new(Arc::clone(&db));
        Self {
            db,
            vectors,
            embedder,
            config,
        }
    }

    #[instrument(skip_all)]
    pub async fn recall(&self, request: RecallRequest) -> Result<RecallResponse, AppError> {
        if let Some(id) = request.id.as_deref() {
            return self.recall_by_id(id, &request).await;
        }

        let query = request
            .query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| AppError::Validation("recall requires a query or an id".into()))?;
        if request.limit == 0 {
            return Err(AppError::Validation("limit must be at least 1".into()));
        }

        // Multi-index vector search with overfetch, then RRF and dedup.
        let query_embedding = self.embedder.embed(query).await?;
        let overfetch = request.limit * self.config.retrieval_overfetch.max(1);

        let content_hits = self
            .vectors
            .query(VectorCollection::Content, query_embedding.clone(), overfetch, None)
            .await?;
        let chunk_hits = self
            .vectors
            .query(VectorCollection::Chunks, query_embedding, overfetch, None)
            .await?;

        let fused = fuse_indices(
            &[
                ("content".to_string(), content_hits),
                ("chunks".to_string(), chunk_hits),
            ],
            self.config.rrf_constant,
        );
        let deduped = dedupe_by_artifact(fused);

        // Keep only hits whose revision row still exists (stale vector
        // entries are filtered out), then truncate to the caller's limit.
        let mut results: Vec<(FusedHit, ArtifactRevision)> = Vec::new();
        for hit in deduped {
            if results.len() >= request.limit {
                break;
            }
            let revision = ArtifactRevision::find_revision(
                &self.db,
                &hit.record.artifact_uid,
                &hit.record.revision_id,
            )
            .await?;
            match revision {
                Some(revision) => results.push((hit, revision)),
                None => warn!(id = %hit.record.id, "dropping stale vector entry"),
            }
        }

        let mut recall_results = Vec::new();
        for (hit, revision) in &results {
            recall_results.push(self.hydrate_result(hit, revision).await?);
        }

        let primary_uids: Vec<String> = recall_results
            .iter()
            .map(|r| r.artifact_uid.clone())
            .collect();

        // Graph expansion supplies related-but-unmatched artifacts.
        let related = if request.expand {
            expand(
                &self.db,
                &primary_uids,
                self.config.graph_depth,
                request.graph_budget.unwrap_or(self.config.graph_budget),
                request
                    .edge_types
                    .as_deref()
                    .unwrap_or(&self.config.graph_edge_types),
                GraphWeights::from_config(&self.config),
            )
            .await?
        } else {
            Vec::new()
        };

        if request.include_events {
            for result in &mut recall_results {
                result.events = Some(
                    self.events_view(&result.artifact_uid, &result.revision_id)
                        .await?,
                );
            }
        }

        let (entities, edges) = self
            .entity_views(&primary_uids, &request)
            .await?;

        info!(
            results = recall_results.len(),
            related = related.len(),
            "recall complete"
        );

        Ok(RecallResponse {
            results: recall_results,
            related,
            entities,
            edges,
        })
    }

    /// Single-artifact mode: no search, just hydration (plus events when
    /// asked).
    async fn recall_by_id(
        &self,
        id: &str,
        request: &RecallRequest,
    ) -> Result<RecallResponse, AppError> {
        let revision = if id.starts_with("art_") {
            ArtifactRevision::find_by_artifact_id(&self.db, id, None).await?
        } else {
            ArtifactRevision::latest_for_uid(&self.db, id).await?
        }
        .ok_or_else(|| AppError::NotFound(format!("artifact {id} not found")))?;

        let content = self.full_content(&revision).await?;
        let events = if request.include_events {
            Some(
                self.events_view(&revision.artifact_uid, &revision.revision_id)
                    .await?,
            )
        } else {
            None
        };

        let primary_uids = vec![revision.artifact_uid.clone()];
        let (entities, edges) = self.entity_views(&primary_uids, request).await?;

        Ok(RecallResponse {
            results: vec![RecallResult {
                artifact_id: revision.artifact_id.clone(),
                artifact_uid: revision.artifact_uid.clone(),
                revision_id: revision.revision_id.clone(),
                title: revision.title.clone(),
                content,
                score: 1.0,
                matched: "id".to_string(),
                chunk_index: None,
                events,
            }],
            related: Vec::new(),
            entities,
            edges,
        })
    }

    async fn hydrate_result(
        &self,
        hit: &FusedHit,
        revision: &ArtifactRevision,
    ) -> Result<RecallResult, AppError> {
        let mut content = hit.record.text.clone();
        let mut matched = "content";

        if hit.is_chunk() {
            matched = "chunk";
            // Surround the matched chunk with its siblings for context.
            if let Some(chunk_index) = hit.record.chunk_index {
                let siblings = self
                    .vectors
                    .chunks_for_artifact(artifact_key(&hit.record.id))
                    .await?;
                let pieces: Vec<ChunkPiece> = siblings
                    .into_iter()
                    .map(|record| ChunkPiece {
                        chunk_id: record.id,
                        artifact_id: record.artifact_id,
                        chunk_index: record.chunk_index.unwrap_or(0),
                        content: record.text,
                        start_char: record.start_char.unwrap_or(0),
                        end_char: record.end_char.unwrap_or(0),
                        token_count: record.token_count,
                        content_hash: record.content_hash,
                    })
                    .collect();
                let expanded = expand_neighbors(&pieces, chunk_index);
                if !expanded.is_empty() {
                    content = expanded;
                }
            }
        }

        Ok(RecallResult {
            artifact_id: revision.artifact_id.clone(),
            artifact_uid: revision.artifact_uid.clone(),
            revision_id: revision.revision_id.clone(),
            title: revision.title.clone(),
            content,
            score: hit.rrf_score,
            matched: matched.to_string(),
            chunk_index: hit.record.chunk_index,
            events: None,
        })
    }

    /// Full text of a revision: the content record for single pieces, the
    /// chunk sequence stitched with boundary markers otherwise.
    async fn full_content(&self, revision: &ArtifactRevision) -> Result<String, AppError> {
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
            return Ok(record.text);
        }

        let chunks = self.vectors.chunks_for_artifact(&revision.artifact_id).await?;
        Ok(chunks
            .into_iter()
            .map(|record| record.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn events_view(
        &self,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Vec<EventView>, AppError> {
        let events = SemanticEvent::events_for_revision(&self.db, artifact_uid, revision_id).await?;
        let event_ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        let mut evidence = SemanticEvent::evidence_for_events(&self.db, &event_ids).await?;

        Ok(events
            .into_iter()
            .map(|event| {
                let spans = evidence.remove(&event.id).unwrap_or_default();
                EventView {
                    event_id: event.id,
                    category: event.category,
                    narrative: event.narrative,
                    event_time: event.event_time,
                    subject: event.subject,
                    actors: event.actors,
                    confidence: event.confidence,
                    evidence: spans
                        .into_iter()
                        .map(|span| EvidenceView {
                            quote: span.quote,
                            start_char: span.start_char,
                            end_char: span.end_char,
                            chunk_id: span.chunk_id,
                        })
                        .collect(),
                }
            })
            .collect())
    }

    /// Entities touching the result set, and the edges among them, when the
    /// caller asked for either.
    async fn entity_views(
        &self,
        primary_uids: &[String],
        request: &RecallRequest,
    ) -> Result<(Vec<EntityView>, Vec<EdgeView>), AppError> {
        if !request.include_entities && !request.include_edges {
            return Ok((Vec::new(), Vec::new()));
        }

        let entity_ids = graph::entities_for_artifacts(&self.db, primary_uids).await?;

        let entities = if request.include_entities {
            let mut seen = HashSet::new();
            Entity::find_by_ids(&self.db, &entity_ids)
                .await?
                .into_iter()
                .filter(|entity| seen.insert(entity.id.clone()))
                .map(|entity| EntityView {
                    entity_id: entity.id,
                    entity_type: entity.entity_type.as_str().to_string(),
                    canonical_name: entity.canonical_name,
                    needs_review: entity.needs_review,
                })
                .collect()
        } else {
            Vec::new()
        };

        let edges = if request.include_edges {
            let types = request
                .edge_types
                .as_deref()
                .unwrap_or(&self.config.graph_edge_types);
            EntityEdge::for_entities(&self.db, &entity_ids, types)
                .await?
                .into_iter()
                .map(|edge| EdgeView {
                    source_entity_id: edge.source_entity_id,
                    target_entity_id: edge.target_entity_id,
                    relationship_type: edge.relationship_type,
                    confidence: edge.confidence,
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok((entities, edges))
    }
}
