use std::collections::HashMap;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{
    entity_alias::EntityAlias, entity_mention::EntityMention, event_actor::EventActor,
    event_evidence::EventEvidence, event_subject::EventSubject,
};

/// Role an actor plays in an event. Unknown roles collapse to `Other` rather
/// than failing the whole extraction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Owner,
    Contributor,
    Reviewer,
    Stakeholder,
    #[default]
    Other,
}

impl ActorRole {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "owner" => Self::Owner,
            "contributor" => Self::Contributor,
            "reviewer" => Self::Reviewer,
            "stakeholder" => Self::Stakeholder,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Contributor => "contributor",
            Self::Reviewer => "reviewer",
            Self::Stakeholder => "stakeholder",
            Self::Other => "other",
        }
    }
}

/// What an event is about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectRef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Who took part in an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActorRef {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub role: ActorRole,
}

/// Constraints for [`SemanticEvent::search`]. Empty filter lists recent
/// events across the store.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub category: Option<String>,
    pub artifact_uid: Option<String>,
    pub time_from: Option<chrono::DateTime<chrono::Utc>>,
    pub time_to: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: usize,
}

stored_object!(SemanticEvent, "semantic_event", {
    artifact_uid: String,
    revision_id: String,
    /// Dynamic category, normalized to a capitalized singular noun.
    category: String,
    narrative: String,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    event_time: Option<DateTime<Utc>>,
    subject: SubjectRef,
    actors: Vec<ActorRef>,
    confidence: f32,
    /// Narrative embedding, cached for downstream scoring.
    embedding: Vec<f32>,
    extraction_run_id: String
});

impl SemanticEvent {
    /// Normalize a raw category suggestion to the stored form: trimmed,
    /// first letter capitalized, trailing plural `s` dropped. Categories are
    /// open-ended so this never rejects a value, only tidies it.
    pub fn normalize_category(raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let mut chars = trimmed.chars();
        let mut normalized: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => return String::new(),
        };

        if normalized.len() > 3 && normalized.ends_with('s') && !normalized.ends_with("ss") {
            normalized.pop();
        }

        normalized
    }

    /// Filtered event listing for internal callers: by category, time range
    /// and owning artifact. Categories are normalized before comparison so
    /// callers can pass raw suggestions.
    pub async fn search(
        db: &SurrealDbClient,
        filter: EventFilter,
    ) -> Result<Vec<Self>, AppError> {
        let mut conditions = vec!["1 = 1".to_string()];
        if filter.category.is_some() {
            conditions.push("category = $category".to_string());
        }
        if filter.artifact_uid.is_some() {
            conditions.push("artifact_uid = $artifact_uid".to_string());
        }
        if filter.time_from.is_some() {
            conditions.push("event_time != NONE AND event_time >= $time_from".to_string());
        }
        if filter.time_to.is_some() {
            conditions.push("event_time != NONE AND event_time <= $time_to".to_string());
        }

        let limit = if filter.limit == 0 {
            20
        } else {
            filter.limit.min(100)
        };
        let sql = format!(
            "SELECT * FROM semantic_event WHERE {} \
             ORDER BY event_time DESC, created_at DESC LIMIT {limit}",
            conditions.join(" AND "),
        );

        let mut query = db.client.query(sql);
        if let Some(category) = filter.category {
            query = query.bind(("category", Self::normalize_category(&category)));
        }
        if let Some(artifact_uid) = filter.artifact_uid {
            query = query.bind(("artifact_uid", artifact_uid));
        }
        if let Some(time_from) = filter.time_from {
            query = query.bind(("time_from", surrealdb::sql::Datetime::from(time_from)));
        }
        if let Some(time_to) = filter.time_to {
            query = query.bind(("time_to", surrealdb::sql::Datetime::from(time_to)));
        }

        let events: Vec<Self> = query.await?.take(0)?;

        Ok(events)
    }

    pub async fn events_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM semantic_event \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id \
                 ORDER BY created_at ASC",
            )
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .bind(("revision_id", revision_id.to_owned()))
            .await?;
        let events: Vec<Self> = response.take(0)?;

        Ok(events)
    }

    pub async fn get_with_evidence(
        db: &SurrealDbClient,
        event_id: &str,
    ) -> Result<Option<(Self, Vec<EventEvidence>)>, AppError> {
        let Some(event) = db.get_item::<Self>(event_id).await? else {
            return Ok(None);
        };

        let evidence = EventEvidence::for_event(db, event_id).await?;

        Ok(Some((event, evidence)))
    }

    /// Evidence rows for many events in one query, grouped by event id.
    pub async fn evidence_for_events(
        db: &SurrealDbClient,
        event_ids: &[String],
    ) -> Result<HashMap<String, Vec<EventEvidence>>, AppError> {
        if event_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut response = db
            .query(
                "SELECT * FROM event_evidence WHERE event_id IN $event_ids \
                 ORDER BY start_char ASC",
            )
            .bind(("event_ids", event_ids.to_vec()))
            .await?;
        let rows: Vec<EventEvidence> = response.take(0)?;

        let mut grouped: HashMap<String, Vec<EventEvidence>> = HashMap::new();
        for row in rows {
            grouped.entry(row.event_id.clone()).or_default().push(row);
        }

        Ok(grouped)
    }

    /// Replace the full event set of a revision in a single transaction:
    /// delete the previous events with their evidence and entity links, then
    /// insert the new rows together with the alias and mention rows they
    /// reference. Readers observe either the complete old set or the
    /// complete new set.
    #[allow(clippy::too_many_arguments)]
    pub async fn replace_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
        events: Vec<Self>,
        evidence: Vec<EventEvidence>,
        actors: Vec<EventActor>,
        subjects: Vec<EventSubject>,
        aliases: Vec<EntityAlias>,
        mentions: Vec<EntityMention>,
    ) -> Result<(), AppError> {
        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "LET $old_events = (SELECT VALUE record::id(id) FROM semantic_event \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id);",
            )
            .query("DELETE event_actor WHERE event_id IN $old_events;")
            .query("DELETE event_subject WHERE event_id IN $old_events;")
            .query(
                "DELETE event_evidence \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id;",
            )
            .query(
                "DELETE entity_mention \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id;",
            )
            .query(
                "DELETE semantic_event \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id;",
            )
            .query(
                "FOR $event IN $events { \
                   CREATE type::thing('semantic_event', $event.id) CONTENT $event; };",
            )
            .query(
                "FOR $row IN $evidence { \
                   CREATE type::thing('event_evidence', $row.id) CONTENT $row; };",
            )
            .query(
                "FOR $row IN $actors { \
                   CREATE type::thing('event_actor', $row.id) CONTENT $row; };",
            )
            .query(
                "FOR $row IN $subjects { \
                   CREATE type::thing('event_subject', $row.id) CONTENT $row; };",
            )
            .query(
                "FOR $row IN $aliases { \
                   UPSERT type::thing('entity_alias', $row.id) CONTENT $row; };",
            )
            .query(
                "FOR $row IN $mentions { \
                   CREATE type::thing('entity_mention', $row.id) CONTENT $row; };",
            )
            .query("COMMIT TRANSACTION;")
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .bind(("revision_id", revision_id.to_owned()))
            .bind(("events", events))
            .bind(("evidence", evidence))
            .bind(("actors", actors))
            .bind(("subjects", subjects))
            .bind(("aliases", aliases))
            .bind(("mentions", mentions))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete everything owned by a revision's events. Used by `forget`.
    /// Returns (events, evidence) counts.
    pub async fn delete_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<(usize, usize), AppError> {
        let events = Self::events_for_revision(db, artifact_uid, revision_id).await?;
        let event_ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        let evidence = Self::evidence_for_events(db, &event_ids).await?;
        let evidence_count = evidence.values().map(Vec::len).sum();

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query("DELETE event_actor WHERE event_id IN $event_ids;")
            .query("DELETE event_subject WHERE event_id IN $event_ids;")
            .query(
                "DELETE event_evidence \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id;",
            )
            .query(
                "DELETE semantic_event \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id;",
            )
            .query("COMMIT TRANSACTION;")
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .bind(("revision_id", revision_id.to_owned()))
            .bind(("event_ids", event_ids))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok((events.len(), evidence_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn category_normalization_capitalizes_and_singularizes() {
        assert_eq!(SemanticEvent::normalize_category("decision"), "Decision");
        assert_eq!(SemanticEvent::normalize_category("decisions"), "Decision");
        assert_eq!(SemanticEvent::normalize_category("  risk "), "Risk");
        assert_eq!(SemanticEvent::normalize_category("Commitments"), "Commitment");
        // Short words and double-s endings keep their final letter.
        assert_eq!(SemanticEvent::normalize_category("progress"), "Progress");
        assert_eq!(SemanticEvent::normalize_category(""), "");
    }

    fn sample_event(uid: &str, rev: &str, narrative: &str) -> SemanticEvent {
        let now = Utc::now();
        SemanticEvent {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            artifact_uid: uid.to_string(),
            revision_id: rev.to_string(),
            category: "Decision".to_string(),
            narrative: narrative.to_string(),
            event_time: None,
            subject: SubjectRef {
                kind: "project".to_string(),
                reference: "launch".to_string(),
            },
            actors: vec![ActorRef {
                reference: "Alice".to_string(),
                role: ActorRole::Owner,
            }],
            confidence: 0.9,
            embedding: vec![1.0, 0.0, 0.0],
            extraction_run_id: "job-1".to_string(),
        }
    }

    fn sample_evidence(event: &SemanticEvent, quote: &str) -> EventEvidence {
        let now = Utc::now();
        EventEvidence {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            event_id: event.id.clone(),
            artifact_uid: event.artifact_uid.clone(),
            revision_id: event.revision_id.clone(),
            chunk_id: None,
            start_char: 0,
            end_char: quote.len(),
            quote: quote.to_string(),
        }
    }

    async fn setup() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.build_indexes(3).await.expect("Failed to build indexes");
        db
    }

    #[tokio::test]
    async fn replace_for_revision_swaps_the_full_set() {
        let db = setup().await;

        let first = sample_event("uid_e", "rev_000001", "Alice decided to ship");
        let first_evidence = sample_evidence(&first, "decided to ship");
        SemanticEvent::replace_for_revision(
            &db,
            "uid_e",
            "rev_000001",
            vec![first.clone()],
            vec![first_evidence],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .await
        .expect("first replace failed");

        let second = sample_event("uid_e", "rev_000001", "Alice decided to delay");
        let second_evidence = sample_evidence(&second, "decided to delay");
        SemanticEvent::replace_for_revision(
            &db,
            "uid_e",
            "rev_000001",
            vec![second.clone()],
            vec![second_evidence],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .await
        .expect("second replace failed");

        // No residue of the first run survives.
        let events = SemanticEvent::events_for_revision(&db, "uid_e", "rev_000001")
            .await
            .expect("fetch failed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].narrative, "Alice decided to delay");

        let evidence = SemanticEvent::evidence_for_events(&db, &[second.id.clone()])
            .await
            .expect("evidence fetch failed");
        assert_eq!(evidence.get(&second.id).map(Vec::len), Some(1));

        let stale = SemanticEvent::evidence_for_events(&db, &[first.id.clone()])
            .await
            .expect("evidence fetch failed");
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn search_filters_by_category_and_artifact() {
        let db = setup().await;

        let mut decision = sample_event("uid_s", "rev_000001", "Alice decided to ship");
        decision.event_time = Some(Utc::now());
        let risk = SemanticEvent {
            category: "Risk".to_string(),
            ..sample_event("uid_s", "rev_000001", "Launch may slip")
        };
        let other_doc = sample_event("uid_t", "rev_000001", "Bob decided to hire");
        for event in [&decision, &risk, &other_doc] {
            db.store_item(event.clone()).await.expect("store failed");
        }

        // Raw category suggestions are normalized before matching.
        let decisions = SemanticEvent::search(
            &db,
            EventFilter {
                category: Some("decisions".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("search failed");
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|e| e.category == "Decision"));

        let scoped = SemanticEvent::search(
            &db,
            EventFilter {
                category: Some("Decision".to_string()),
                artifact_uid: Some("uid_s".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("search failed");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].narrative, "Alice decided to ship");

        // Time bounds only match events that carry a time.
        let timed = SemanticEvent::search(
            &db,
            EventFilter {
                time_from: Some(Utc::now() - chrono::Duration::hours(1)),
                ..Default::default()
            },
        )
        .await
        .expect("search failed");
        assert_eq!(timed.len(), 1);
        assert_eq!(timed[0].id, decision.id);
    }

    #[tokio::test]
    async fn delete_for_revision_reports_counts() {
        let db = setup().await;

        let event = sample_event("uid_f", "rev_000001", "Bob committed to review");
        let evidence = sample_evidence(&event, "committed to review");
        SemanticEvent::replace_for_revision(
            &db,
            "uid_f",
            "rev_000001",
            vec![event],
            vec![evidence],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .await
        .expect("replace failed");

        let (events_deleted, evidence_deleted) =
            SemanticEvent::delete_for_revision(&db, "uid_f", "rev_000001")
                .await
                .expect("delete failed");
        assert_eq!(events_deleted, 1);
        assert_eq!(evidence_deleted, 1);

        let remaining = SemanticEvent::events_for_revision(&db, "uid_f", "rev_000001")
            .await
            .expect("fetch failed");
        assert!(remaining.is_empty());
    }
}
