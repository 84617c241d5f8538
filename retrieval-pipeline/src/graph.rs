use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::ArtifactRevision,
            entity_edge::EntityEdge,
            event_actor::EventActor,
            event_subject::EventSubject,
        },
    },
    utils::config::AppConfig,
};

/// Tunable relevance weights for graph-expanded artifacts.
#[derive(Debug, Clone, Copy)]
pub struct GraphWeights {
    pub hop: f32,
    pub shared_entity: f32,
    pub edge_confidence: f32,
}

impl GraphWeights {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            hop: config.graph_hop_weight,
            shared_entity: config.graph_shared_entity_weight,
            edge_confidence: config.graph_edge_confidence_weight,
        }
    }
}

/// An artifact reached through the relation graph rather than by vector
/// similarity.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedArtifact {
    pub artifact_uid: String,
    pub artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub revision_id: String,
    pub score: f32,
    pub hop: usize,
    pub shared_entities: usize,
}

#[derive(Deserialize)]
struct EventRow {
    id: String,
    artifact_uid: String,
}

/// Entity ids linked to the given artifacts via event actors, event
/// subjects and mentions.
pub async fn entities_for_artifacts(
    db: &SurrealDbClient,
    artifact_uids: &[String],
) -> Result<Vec<String>, AppError> {
    if artifact_uids.is_empty() {
        return Ok(Vec::new());
    }

    let mut response = db
        .query(
            "SELECT record::id(id) AS id, artifact_uid FROM semantic_event \
             WHERE artifact_uid IN $artifact_uids",
        )
        .bind(("artifact_uids", artifact_uids.to_vec()))
        .await?;
    let events: Vec<EventRow> = response.take(0)?;
    let event_ids: Vec<String> = events.into_iter().map(|row| row.id).collect();

    let mut entity_ids: HashSet<String> = HashSet::new();
    for actor in EventActor::for_events(db, &event_ids).await? {
        entity_ids.insert(actor.entity_id);
    }
    for subject in EventSubject::for_events(db, &event_ids).await? {
        entity_ids.insert(subject.entity_id);
    }

    let mut response = db
        .query(
            "SELECT VALUE entity_id FROM entity_mention \
             WHERE artifact_uid IN $artifact_uids",
        )
        .bind(("artifact_uids", artifact_uids.to_vec()))
        .await?;
    let mentioned: Vec<String> = response.take(0)?;
    entity_ids.extend(mentioned);

    Ok(entity_ids.into_iter().collect())
}

/// Artifacts whose events involve any of the given entities, keyed by uid.
async fn artifacts_for_entities(
    db: &SurrealDbClient,
    entity_ids: &[String],
) -> Result<HashMap<String, HashSet<String>>, AppError> {
    if entity_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut event_to_entities: HashMap<String, HashSet<String>> = HashMap::new();
    for actor in EventActor::for_entities(db, entity_ids).await? {
        event_to_entities
            .entry(actor.event_id)
            .or_default()
            .insert(actor.entity_id);
    }
    for subject in EventSubject::for_entities(db, entity_ids).await? {
        event_to_entities
            .entry(subject.event_id)
            .or_default()
            .insert(subject.entity_id);
    }

    let event_ids: Vec<String> = event_to_entities.keys().cloned().collect();
    if event_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut response = db
        .query(
            "SELECT record::id(id) AS id, artifact_uid FROM semantic_event \
             WHERE record::id(id) IN $event_ids",
        )
        .bind(("event_ids", event_ids))
        .await?;
    let events: Vec<EventRow> = response.take(0)?;

    // uid -> entities that connected it to the frontier
    let mut artifacts: HashMap<String, HashSet<String>> = HashMap::new();
    for event in events {
        if let Some(entities) = event_to_entities.get(&event.id) {
            artifacts
                .entry(event.artifact_uid)
                .or_default()
                .extend(entities.iter().cloned());
        }
    }

    Ok(artifacts)
}

/// Hop-bounded breadth-first expansion from the primary result set over
/// event_actor, event_subject, entity_edge and revision-membership
/// relations. Cycles are tolerated via a visited set keyed by
/// `(entity_id, hop)`. The result is budget-capped and never contains a
/// primary artifact.
pub async fn expand(
    db: &SurrealDbClient,
    seed_artifact_uids: &[String],
    depth: usize,
    budget: usize,
    edge_types: &[String],
    weights: GraphWeights,
) -> Result<Vec<RelatedArtifact>, AppError> {
    if seed_artifact_uids.is_empty() || depth == 0 || budget == 0 {
        return Ok(Vec::new());
    }

    let exclude: HashSet<String> = seed_artifact_uids.iter().cloned().collect();
    let seed_entities: HashSet<String> = entities_for_artifacts(db, seed_artifact_uids)
        .await?
        .into_iter()
        .collect();
    if seed_entities.is_empty() {
        return Ok(Vec::new());
    }

    struct Reached {
        hop: usize,
        via_entities: HashSet<String>,
        edge_confidence_sum: f32,
    }

    let mut visited: HashSet<(String, usize)> = HashSet::new();
    let mut frontier: Vec<String> = seed_entities.iter().cloned().collect();
    // entity -> confidence accumulated along the edges that discovered it
    let mut entity_confidence: HashMap<String, f32> = HashMap::new();
    let mut reached: HashMap<String, Reached> = HashMap::new();

    for hop in 1..=depth {
        if frontier.is_empty() {
            break;
        }
        for entity in &frontier {
            visited.insert((entity.clone(), hop));
        }

        // Revision membership: artifacts whose events involve the frontier.
        let artifacts = artifacts_for_entities(db, &frontier).await?;
        for (artifact_uid, via_entities) in artifacts {
            if exclude.contains(&artifact_uid) {
                continue;
            }
            let edge_confidence_sum = via_entities
                .iter()
                .map(|entity| entity_confidence.get(entity).copied().unwrap_or(0.0))
                .sum();
            let entry = reached.entry(artifact_uid).or_insert(Reached {
                hop,
                via_entities: HashSet::new(),
                edge_confidence_sum,
            });
            entry.via_entities.extend(via_entities);
        }

        // Entity edges feed the next frontier.
        if hop == depth {
            break;
        }
        let edges = EntityEdge::for_entities(db, &frontier, edge_types).await?;
        let frontier_set: HashSet<&String> = frontier.iter().collect();
        let mut next_frontier: Vec<String> = Vec::new();
        for edge in edges {
            for neighbor in [edge.source_entity_id.clone(), edge.target_entity_id.clone()] {
                if frontier_set.contains(&neighbor) {
                    continue;
                }
                *entity_confidence.entry(neighbor.clone()).or_insert(0.0) += edge.confidence;
                if visited.insert((neighbor.clone(), hop + 1)) {
                    next_frontier.push(neighbor);
                }
            }
        }

        // Entities of freshly reached artifacts also extend the frontier
        // (artifact-mediated hops).
        let reached_uids: Vec<String> = reached
            .iter()
            .filter(|(_, info)| info.hop == hop)
            .map(|(uid, _)| uid.clone())
            .collect();
        for entity in entities_for_artifacts(db, &reached_uids).await? {
            if !seed_entities.contains(&entity) && visited.insert((entity.clone(), hop + 1)) {
                next_frontier.push(entity);
            }
        }

        frontier = next_frontier;
    }

    // Score and hydrate.
    let mut related = Vec::new();
    for (artifact_uid, info) in reached {
        let Some(revision) = ArtifactRevision::latest_for_uid(db, &artifact_uid).await? else {
            continue;
        };
        let shared_entities = info
            .via_entities
            .iter()
            .filter(|entity| seed_entities.contains(*entity))
            .count();
        let score = weights.hop * (1.0 / info.hop as f32)
            + weights.shared_entity * shared_entities as f32
            + weights.edge_confidence * info.edge_confidence_sum;

        related.push(RelatedArtifact {
            artifact_uid,
            artifact_id: revision.artifact_id,
            title: revision.title,
            revision_id: revision.revision_id,
            score,
            hop: info.hop,
            shared_entities,
        });
    }

    related.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.artifact_uid.cmp(&b.artifact_uid))
    });
    related.truncate(budget);

    debug!(
        seeds = seed_artifact_uids.len(),
        related = related.len(),
        "graph expansion complete"
    );

    Ok(related)
}
