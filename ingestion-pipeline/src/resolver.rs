use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            entity::{Entity, EntityType},
            entity_alias::EntityAlias,
            entity_edge::EntityEdge,
            entity_mention::EntityMention,
        },
    },
    utils::{
        config::AppConfig,
        embedding::{cosine_similarity, EmbeddingProvider},
    },
};

use crate::extractor::ExtractedEntity;

/// Score bonus for an exact email match between the mention and a candidate.
const EMAIL_BOOST: f32 = 0.10;
/// Score bonus when both role and organization match exactly.
const ROLE_ORG_BOOST: f32 = 0.05;

/// Relationship type recorded between a freshly created reviewable entity
/// and the candidate it nearly merged with.
const POSSIBLY_SAME: &str = "POSSIBLY_SAME";

/// Where in an artifact the resolution is happening.
#[derive(Debug, Clone)]
pub struct ResolverContext {
    pub artifact_uid: String,
    pub revision_id: String,
    pub doc_title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionDecision {
    /// Matched an existing entity above the merge threshold.
    Merged,
    /// Close to an existing entity but not close enough; created with
    /// `needs_review` and a POSSIBLY_SAME hint.
    CreatedForReview,
    /// No plausible candidate; created clean.
    Created,
}

/// Outcome of resolving one extracted entity. Alias and mention rows are
/// returned instead of written so the worker can commit them in the same
/// transaction as the events that reference the entity.
#[derive(Debug)]
pub struct ResolvedEntity {
    pub entity_id: String,
    pub decision: ResolutionDecision,
    pub alias_rows: Vec<EntityAlias>,
    pub mention_rows: Vec<EntityMention>,
}

/// Component H: surface form to canonical entity, via typed candidate lookup
/// and context-embedding similarity with confidence-bounded merges.
pub struct EntityResolver {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    merge_threshold: f32,
    review_threshold: f32,
}

impl EntityResolver {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>, config: &AppConfig) -> Self {
        Self {
            db,
            embedder,
            merge_threshold: config.entity_merge_threshold,
            review_threshold: config.entity_review_threshold,
        }
    }

    pub async fn resolve(
        &self,
        extracted: &ExtractedEntity,
        ctx: &ResolverContext,
    ) -> Result<ResolvedEntity, AppError> {
        let entity_type = EntityType::parse(&extracted.entity_type);
        let canonical = if extracted.canonical_suggestion.trim().is_empty() {
            extracted.surface_form.clone()
        } else {
            extracted.canonical_suggestion.clone()
        };
        if canonical.trim().is_empty() {
            return Err(AppError::Validation(
                "entity with no surface form or canonical suggestion".into(),
            ));
        }

        let forms = self.collect_forms(extracted, &canonical);
        let candidates = self.lookup_candidates(entity_type, &forms, extracted).await?;

        let context_text = build_context(extracted, &canonical, ctx);
        let context_embedding = self.embedder.embed(&context_text).await?;

        let mut scored: Vec<(f32, &Entity)> = candidates
            .iter()
            .map(|candidate| (score_candidate(candidate, extracted, &context_embedding), candidate))
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.mention_count.cmp(&a.1.mention_count))
                .then_with(|| a.1.created_at.cmp(&b.1.created_at))
        });

        let best = scored.first().map(|(score, entity)| (*score, (*entity).clone()));

        match best {
            Some((score, candidate)) if score >= self.merge_threshold => {
                self.merge_into(candidate, extracted, &canonical, context_embedding, score, ctx)
                    .await
            }
            Some((score, candidate)) if score >= self.review_threshold => {
                let resolved = self
                    .create_entity(extracted, &canonical, entity_type, context_embedding, true, ctx)
                    .await?;

                // Leave a hint for review tooling that these two may be one.
                let hint = EntityEdge {
                    id: Uuid::new_v4().to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                    source_entity_id: resolved.entity_id.clone(),
                    target_entity_id: candidate.id.clone(),
                    relationship_type: POSSIBLY_SAME.to_string(),
                    artifact_uid: ctx.artifact_uid.clone(),
                    revision_id: ctx.revision_id.clone(),
                    confidence: score,
                    evidence_quote: None,
                };
                if let Err(err) = hint.upsert_merge(&self.db).await {
                    warn!(error = %err, "failed to record POSSIBLY_SAME hint");
                }

                info!(
                    entity_id = %resolved.entity_id,
                    near = %candidate.id,
                    score,
                    "entity created for review"
                );
                Ok(resolved)
            }
            _ => {
                self.create_entity(extracted, &canonical, entity_type, context_embedding, false, ctx)
                    .await
            }
        }
    }

    fn collect_forms(&self, extracted: &ExtractedEntity, canonical: &str) -> Vec<String> {
        let mut forms = Vec::new();
        let mut seen = HashSet::new();
        for form in std::iter::once(extracted.surface_form.as_str())
            .chain(std::iter::once(canonical))
            .chain(extracted.aliases_in_doc.iter().map(String::as_str))
        {
            let trimmed = form.trim();
            if trimmed.is_empty() {
                continue;
            }
            if seen.insert(trimmed.to_lowercase()) {
                forms.push(trimmed.to_string());
            }
        }
        forms
    }

    async fn lookup_candidates(
        &self,
        entity_type: EntityType,
        forms: &[String],
        extracted: &ExtractedEntity,
    ) -> Result<Vec<Entity>, AppError> {
        let mut candidates = Entity::find_by_names(&self.db, entity_type, forms).await?;

        let alias_entity_ids = EntityAlias::entity_ids_for_forms(&self.db, forms).await?;
        for entity in Entity::find_by_ids(&self.db, &alias_entity_ids).await? {
            if entity.entity_type == entity_type {
                candidates.push(entity);
            }
        }

        if let Some(email) = extracted.context_clues.email.as_deref() {
            candidates.extend(Entity::find_by_email(&self.db, entity_type, email).await?);
        }

        let mut seen = HashSet::new();
        candidates.retain(|candidate| seen.insert(candidate.id.clone()));

        debug!(
            surface_form = %extracted.surface_form,
            candidates = candidates.len(),
            "candidate lookup complete"
        );

        Ok(candidates)
    }

    #[allow(clippy::too_many_arguments)]
    async fn merge_into(
        &self,
        candidate: Entity,
        extracted: &ExtractedEntity,
        canonical: &str,
        context_embedding: Vec<f32>,
        score: f32,
        ctx: &ResolverContext,
    ) -> Result<ResolvedEntity, AppError> {
        // Running average weighted by how many mentions shaped the stored
        // embedding so far.
        let count = candidate.mention_count.max(1) as f32;
        let averaged: Vec<f32> = candidate
            .context_embedding
            .iter()
            .zip(context_embedding.iter())
            .map(|(old, new)| (old * count + new) / (count + 1.0))
            .collect();
        let averaged = if averaged.is_empty() {
            context_embedding
        } else {
            averaged
        };

        let more_specific_name = more_specific_canonical(&candidate.canonical_name, canonical);

        Entity::apply_merge(
            &self.db,
            &candidate.id,
            averaged,
            more_specific_name,
            extracted.context_clues.role.clone(),
            extracted.context_clues.org.clone(),
            extracted.context_clues.email.clone(),
        )
        .await?;

        let alias_rows = self
            .new_alias_rows(&candidate.id, &self.collect_forms(extracted, canonical))
            .await?;
        let mention_rows = mention_rows_for(&candidate.id, extracted, ctx);

        info!(entity_id = %candidate.id, score, "merged mention into existing entity");

        Ok(ResolvedEntity {
            entity_id: candidate.id,
            decision: ResolutionDecision::Merged,
            alias_rows,
            mention_rows,
        })
    }

    async fn create_entity(
        &self,
        extracted: &ExtractedEntity,
        canonical: &str,
        entity_type: EntityType,
        context_embedding: Vec<f32>,
        needs_review: bool,
        ctx: &ResolverContext,
    ) -> Result<ResolvedEntity, AppError> {
        let now = Utc::now();
        let entity = Entity {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            entity_type,
            canonical_name: canonical.to_string(),
            role: extracted.context_clues.role.clone(),
            organization: extracted.context_clues.org.clone(),
            email: extracted.context_clues.email.clone(),
            context_embedding,
            needs_review,
            first_seen_artifact_uid: ctx.artifact_uid.clone(),
            first_seen_revision_id: ctx.revision_id.clone(),
            mention_count: 1,
        };
        let entity_id = entity.id.clone();
        self.db.store_item(entity).await?;

        let alias_rows: Vec<EntityAlias> = self
            .collect_forms(extracted, canonical)
            .into_iter()
            .filter(|form| !form.eq_ignore_ascii_case(canonical))
            .map(|form| EntityAlias {
                id: Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                entity_id: entity_id.clone(),
                surface_form: form,
            })
            .collect();
        let mention_rows = mention_rows_for(&entity_id, extracted, ctx);

        Ok(ResolvedEntity {
            entity_id,
            decision: if needs_review {
                ResolutionDecision::CreatedForReview
            } else {
                ResolutionDecision::Created
            },
            alias_rows,
            mention_rows,
        })
    }

    /// Alias rows for forms the entity does not carry yet.
    async fn new_alias_rows(
        &self,
        entity_id: &str,
        forms: &[String],
    ) -> Result<Vec<EntityAlias>, AppError> {
        let existing: HashSet<String> = EntityAlias::forms_for_entity(&self.db, entity_id)
            .await?
            .into_iter()
            .map(|form| form.to_lowercase())
            .collect();

        let now = Utc::now();
        Ok(forms
            .iter()
            .filter(|form| !existing.contains(&form.to_lowercase()))
            .map(|form| EntityAlias {
                id: Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                entity_id: entity_id.to_string(),
                surface_form: form.clone(),
            })
            .collect())
    }
}

/// Context string embedded for disambiguation. The email is deliberately
/// left out; it participates as an exact-match boost instead.
fn build_context(extracted: &ExtractedEntity, canonical: &str, ctx: &ResolverContext) -> String {
    let mut parts = vec![canonical.to_string()];
    if let Some(role) = extracted.context_clues.role.as_deref() {
        parts.push(role.to_string());
    }
    if let Some(org) = extracted.context_clues.org.as_deref() {
        parts.push(org.to_string());
    }
    if let Some(title) = ctx.doc_title.as_deref() {
        parts.push(title.to_string());
    }
    parts.join(" ")
}

fn score_candidate(
    candidate: &Entity,
    extracted: &ExtractedEntity,
    context_embedding: &[f32],
) -> f32 {
    let mut score = cosine_similarity(context_embedding, &candidate.context_embedding);

    if let (Some(candidate_email), Some(mention_email)) = (
        candidate.email.as_deref(),
        extracted.context_clues.email.as_deref(),
    ) {
        if candidate_email.eq_ignore_ascii_case(mention_email) {
            score += EMAIL_BOOST;
        }
    }

    if let (Some(candidate_role), Some(mention_role), Some(candidate_org), Some(mention_org)) = (
        candidate.role.as_deref(),
        extracted.context_clues.role.as_deref(),
        candidate.organization.as_deref(),
        extracted.context_clues.org.as_deref(),
    ) {
        if candidate_role.eq_ignore_ascii_case(mention_role)
            && candidate_org.eq_ignore_ascii_case(mention_org)
        {
            score += ROLE_ORG_BOOST;
        }
    }

    score.min(1.0)
}

/// A replacement canonical name must extend the existing one, never shorten
/// or rewrite it.
fn more_specific_canonical(existing: &str, suggested: &str) -> Option<String> {
    let existing_trimmed = existing.trim();
    let suggested_trimmed = suggested.trim();
    if suggested_trimmed.len() > existing_trimmed.len()
        && suggested_trimmed
            .to_lowercase()
            .contains(&existing_trimmed.to_lowercase())
    {
        Some(suggested_trimmed.to_string())
    } else {
        None
    }
}

fn mention_rows_for(
    entity_id: &str,
    extracted: &ExtractedEntity,
    ctx: &ResolverContext,
) -> Vec<EntityMention> {
    let (Some(start), Some(end)) = (extracted.start_char, extracted.end_char) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }

    let now = Utc::now();
    vec![EntityMention {
        id: Uuid::new_v4().to_string(),
        created_at: now,
        updated_at: now,
        entity_id: entity_id.to_string(),
        artifact_uid: ctx.artifact_uid.clone(),
        revision_id: ctx.revision_id.clone(),
        chunk_id: extracted.chunk_id.clone(),
        start_char: start,
        end_char: end,
        surface_form: extracted.surface_form.clone(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ContextClues;

    fn test_config() -> AppConfig {
        AppConfig::default()
    }

    async fn setup() -> (Arc<SurrealDbClient>, EntityResolver) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.build_indexes(4096).await.expect("Failed to build indexes");
        let embedder = Arc::new(EmbeddingProvider::deterministic(4096));
        let resolver = EntityResolver::new(Arc::clone(&db), embedder, &test_config());
        (db, resolver)
    }

    fn extracted(
        surface: &str,
        canonical: &str,
        role: Option<&str>,
        org: Option<&str>,
        email: Option<&str>,
    ) -> ExtractedEntity {
        ExtractedEntity {
            surface_form: surface.to_string(),
            canonical_suggestion: canonical.to_string(),
            entity_type: "person".to_string(),
            context_clues: ContextClues {
                role: role.map(str::to_owned),
                org: org.map(str::to_owned),
                email: email.map(str::to_owned),
            },
            aliases_in_doc: Vec::new(),
            confidence: 0.9,
            start_char: Some(10),
            end_char: Some(10 + surface.len()),
            chunk_id: None,
        }
    }

    fn ctx(uid: &str, title: &str) -> ResolverContext {
        ResolverContext {
            artifact_uid: uid.to_string(),
            revision_id: "rev_000001".to_string(),
            doc_title: Some(title.to_string()),
        }
    }

    #[test]
    fn canonical_name_only_grows_more_specific() {
        assert_eq!(
            more_specific_canonical("Alice", "Alice Chen"),
            Some("Alice Chen".to_string())
        );
        assert_eq!(more_specific_canonical("Alice Chen", "Alice"), None);
        assert_eq!(more_specific_canonical("Alice Chen", "Bob Smith Jr"), None);
        assert_eq!(more_specific_canonical("Alice", "alice"), None);
    }

    #[tokio::test]
    async fn identical_context_merges_into_one_entity() {
        let (db, resolver) = setup().await;

        let mention = extracted("Alice Chen", "Alice Chen", Some("PM"), Some("Acme"), None);
        let first = resolver
            .resolve(&mention, &ctx("uid_a", "weekly standup"))
            .await
            .expect("resolve failed");
        assert_eq!(first.decision, ResolutionDecision::Created);

        let second = resolver
            .resolve(&mention, &ctx("uid_b", "weekly standup"))
            .await
            .expect("resolve failed");
        assert_eq!(second.decision, ResolutionDecision::Merged);
        assert_eq!(second.entity_id, first.entity_id);

        let entity = db
            .get_item::<Entity>(&first.entity_id)
            .await
            .expect("get failed")
            .expect("entity missing");
        assert_eq!(entity.mention_count, 2);
        assert!(!entity.needs_review);
    }

    #[tokio::test]
    async fn alias_lookup_finds_candidates_under_short_forms() {
        let (db, resolver) = setup().await;

        let full = extracted("Alice Chen", "Alice Chen", Some("PM"), Some("Acme"), None);
        let mut with_alias = full.clone();
        with_alias.aliases_in_doc = vec!["Alice".to_string()];
        let first = resolver
            .resolve(&with_alias, &ctx("uid_a", "weekly standup"))
            .await
            .expect("resolve failed");
        // The worker commits alias rows with the events; do the same here.
        for alias in &first.alias_rows {
            db.store_item(alias.clone()).await.expect("alias store failed");
        }

        // The short form alone, with matching context, lands on the same
        // entity via the alias table.
        let short = extracted("Alice", "Alice", Some("PM"), Some("Acme"), None);
        let second = resolver
            .resolve(&short, &ctx("uid_b", "weekly standup"))
            .await
            .expect("resolve failed");
        assert_eq!(second.decision, ResolutionDecision::Merged);
        assert_eq!(second.entity_id, first.entity_id);
    }

    #[tokio::test]
    async fn partial_context_overlap_lands_in_review_band() {
        let (db, resolver) = setup().await;

        // Context words: {rivera, designer, initech, notes} + {rivera,
        // painter, initech, notes}: 3 of 4 shared, cosine 0.75.
        let first = resolver
            .resolve(
                &extracted("Rivera", "Rivera", Some("designer"), Some("initech"), None),
                &ctx("uid_a", "notes"),
            )
            .await
            .expect("resolve failed");

        let second = resolver
            .resolve(
                &extracted("Rivera", "Rivera", Some("painter"), Some("initech"), None),
                &ctx("uid_b", "notes"),
            )
            .await
            .expect("resolve failed");

        assert_eq!(second.decision, ResolutionDecision::CreatedForReview);
        assert_ne!(second.entity_id, first.entity_id);

        let entity = db
            .get_item::<Entity>(&second.entity_id)
            .await
            .expect("get failed")
            .expect("entity missing");
        assert!(entity.needs_review);

        // The near-miss leaves a POSSIBLY_SAME hint pointing at the
        // candidate.
        let edges = EntityEdge::for_entities(&db, &[second.entity_id.clone()], &[])
            .await
            .expect("edge fetch failed");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relationship_type, "POSSIBLY_SAME");
        assert_eq!(edges[0].target_entity_id, first.entity_id);
    }

    #[tokio::test]
    async fn exact_email_match_lifts_a_borderline_score_into_merge() {
        let (_db, resolver) = setup().await;

        // Context words {casey, painter, initech, notes, roadmap}: the
        // second mention shares 4 of 5 (cosine 0.8, review band) and the
        // email boost (+0.10) carries it over the merge threshold.
        let first_mention = extracted(
            "Casey",
            "Casey",
            Some("painter"),
            Some("initech"),
            Some("casey@initech.com"),
        );
        let first = resolver
            .resolve(&first_mention, &ctx("uid_a", "notes roadmap"))
            .await
            .expect("resolve failed");

        let second = resolver
            .resolve(
                &extracted(
                    "Casey",
                    "Casey",
                    Some("sculptor"),
                    Some("initech"),
                    Some("casey@initech.com"),
                ),
                &ctx("uid_b", "notes roadmap"),
            )
            .await
            .expect("resolve failed");

        assert_eq!(second.decision, ResolutionDecision::Merged);
        assert_eq!(second.entity_id, first.entity_id);
    }

    #[tokio::test]
    async fn unrelated_context_creates_a_fresh_entity() {
        let (db, resolver) = setup().await;

        let first = resolver
            .resolve(
                &extracted("Alice Chen", "Alice Chen", Some("PM"), Some("Acme"), None),
                &ctx("uid_a", "pricing sync"),
            )
            .await
            .expect("resolve failed");

        let second = resolver
            .resolve(
                &extracted("Dmitri", "Dmitri Volkov", Some("chef"), Some("bistro"), None),
                &ctx("uid_b", "menu planning"),
            )
            .await
            .expect("resolve failed");

        assert_eq!(second.decision, ResolutionDecision::Created);
        assert_ne!(second.entity_id, first.entity_id);

        let entity = db
            .get_item::<Entity>(&second.entity_id)
            .await
            .expect("get failed")
            .expect("entity missing");
        assert!(!entity.needs_review);
        assert_eq!(entity.canonical_name, "Dmitri Volkov");
        // The surface form differing from the canonical name becomes an
        // alias row for the commit transaction.
        assert_eq!(second.alias_rows.len(), 1);
        assert_eq!(second.alias_rows[0].surface_form, "Dmitri");
        assert_eq!(second.mention_rows.len(), 1);
    }
}
