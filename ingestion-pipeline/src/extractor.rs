use std::collections::HashMap;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{error::AppError, utils::config::AppConfig};

/// Disambiguation hints the extractor found next to an entity mention.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContextClues {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEvidence {
    pub quote: String,
    pub start_char: usize,
    pub end_char: usize,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedSubject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "ref", default)]
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedActor {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// One event as the LLM reported it, offsets local to the chunk it came from
/// until [`translate_offsets`] runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEvent {
    pub category: String,
    pub narrative: String,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub subject: Option<ExtractedSubject>,
    #[serde(default)]
    pub actors: Vec<ExtractedActor>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub evidence: Vec<ExtractedEvidence>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub surface_form: String,
    #[serde(default)]
    pub canonical_suggestion: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub context_clues: ContextClues,
    #[serde(default)]
    pub aliases_in_doc: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub start_char: Option<usize>,
    #[serde(default)]
    pub end_char: Option<usize>,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedRelationship {
    pub source_entity: String,
    pub target_entity: String,
    #[serde(default = "default_relationship_type")]
    pub relationship_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub evidence_quote: Option<String>,
}

/// Everything the extractor produced for one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkExtraction {
    #[serde(default)]
    pub events: Vec<ExtractedEvent>,
    #[serde(default, rename = "entities_mentioned")]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

/// The piece of revision text handed to one extraction call.
#[derive(Debug, Clone)]
pub struct ChunkSlice {
    pub content: String,
    pub chunk_index: u32,
    pub chunk_id: Option<String>,
    pub start_char: usize,
}

fn default_confidence() -> f32 {
    0.8
}

fn default_relationship_type() -> String {
    "RELATES_TO".to_string()
}

/// The LLM extractor seam. Implementations return chunk-local character
/// offsets; the worker translates them to revision-global.
#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract_chunk(&self, chunk: &ChunkSlice) -> Result<ChunkExtraction, AppError>;

    /// Merge per-chunk event lists into one canonical, deduplicated list
    /// preserving evidence from every source chunk.
    async fn canonicalize_events(
        &self,
        per_chunk: &[Vec<ExtractedEvent>],
    ) -> Result<Vec<ExtractedEvent>, AppError>;
}

const EXTRACT_SYSTEM_PROMPT: &str = r#"You extract structured semantic events and named entities from text artifacts.

EVENTS: identify the key events in the chunk. For each, report:
- "category": a concise singular noun describing the event type. Common examples: Commitment, Execution, Decision, Collaboration, QualityRisk, Feedback, Change, Stakeholder, Meeting, Insight, Goal, Milestone, Risk, Learning, Question, Transaction. Suggest a new category when none fits.
- "narrative": a 1-2 sentence summary of what happened.
- "event_time": ISO8601 timestamp if the text states one, else null.
- "subject": what the event is about, as {"type": "person|org|project|object|place|other", "ref": "name"}.
- "actors": who was involved, as [{"ref": "name", "role": "owner|contributor|reviewer|stakeholder|other"}].
- "confidence": 0.0-1.0.
- "evidence": exact quotes from the chunk (max 25 words each) with chunk-local character offsets, as [{"quote": "...", "start_char": N, "end_char": M}]. At least one per event.

ENTITIES: list every named entity mentioned (people, organizations, projects, objects, places, other). For each, report:
- "surface_form": the exact text as it appeared.
- "canonical_suggestion": your best guess at the full formal name.
- "type": one of person, org, project, object, place, other.
- "context_clues": {"role": ..., "org": ..., "email": ...} with null for anything absent.
- "aliases_in_doc": other ways this chunk refers to the same entity.
- "confidence": 0.0-1.0.
- "start_char"/"end_char": chunk-local offsets of the first mention.

RELATIONSHIPS: explicit relations stated between two named entities, as {"source_entity": "...", "target_entity": "...", "relationship_type": "UPPER_SNAKE_CASE verb phrase", "confidence": 0.0-1.0, "evidence_quote": "..."}.

Return a single JSON object: {"events": [...], "entities_mentioned": [...], "relationships": [...]}."#;

const CANONICALIZE_SYSTEM_PROMPT: &str = r#"You deduplicate semantic events extracted from multiple chunks of the same artifact.

Merge events describing the same real-world fact (same category, subject and narrative modulo wording). When merging, keep the highest confidence, prefer the more specific event_time, and preserve every evidence span from every chunk with its offsets and chunk ids unchanged.

Return a single JSON object: {"events": [...]} using the same event structure as the input."#;

/// OpenAI-backed extractor (component D's production implementation).
pub struct OpenAiExtractor {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiExtractor {
    pub fn from_config(config: &AppConfig) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        );

        Self {
            client,
            model: config.extraction_model.clone(),
            timeout: Duration::from_secs(config.extraction_timeout_s),
        }
    }

    async fn complete_json(&self, system: &str, user: String) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.0)
            .response_format(ResponseFormat::JsonObject)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(|e| AppError::Extraction(e.to_string()))?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()
                    .map_err(|e| AppError::Extraction(e.to_string()))?
                    .into(),
            ])
            .build()
            .map_err(|e| AppError::Extraction(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "extraction call exceeded {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(classify_llm_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::Extraction("LLM returned no content".into()))
    }
}

#[async_trait]
impl EventExtractor for OpenAiExtractor {
    async fn extract_chunk(&self, chunk: &ChunkSlice) -> Result<ChunkExtraction, AppError> {
        let user = format!(
            "Extract semantic events, named entities and relationships from this chunk.\n\
             Chunk index: {}\nChunk id: {}\n\nText:\n---\n{}\n---",
            chunk.chunk_index,
            chunk.chunk_id.as_deref().unwrap_or("(single piece)"),
            chunk.content,
        );

        let raw = self.complete_json(EXTRACT_SYSTEM_PROMPT, user).await?;
        let extraction: ChunkExtraction = serde_json::from_str(&raw)
            .map_err(|e| AppError::Extraction(format!("unparseable extraction output: {e}")))?;

        debug!(
            chunk_index = chunk.chunk_index,
            events = extraction.events.len(),
            entities = extraction.entities.len(),
            relationships = extraction.relationships.len(),
            "chunk extraction complete"
        );

        Ok(extraction)
    }

    async fn canonicalize_events(
        &self,
        per_chunk: &[Vec<ExtractedEvent>],
    ) -> Result<Vec<ExtractedEvent>, AppError> {
        #[derive(Deserialize)]
        struct Canonical {
            #[serde(default)]
            events: Vec<ExtractedEvent>,
        }

        let payload = serde_json::to_string(per_chunk)
            .map_err(|e| AppError::Extraction(e.to_string()))?;
        let user = format!(
            "Events extracted from {} chunks of one artifact:\n{payload}\n\n\
             Deduplicate and merge them, returning the canonical list with all evidence preserved.",
            per_chunk.len(),
        );

        let raw = self.complete_json(CANONICALIZE_SYSTEM_PROMPT, user).await?;
        let canonical: Canonical = serde_json::from_str(&raw)
            .map_err(|e| AppError::Extraction(format!("unparseable canonical output: {e}")))?;

        Ok(canonical.events)
    }
}

fn classify_llm_error(err: async_openai::error::OpenAIError) -> AppError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("429") {
        AppError::RateLimit(message)
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        AppError::Timeout(message)
    } else {
        AppError::Extraction(message)
    }
}

/// Shift chunk-local character offsets to revision-global ones and stamp the
/// owning chunk id on every span.
pub fn translate_offsets(
    extraction: &mut ChunkExtraction,
    start_char: usize,
    chunk_id: Option<&str>,
) {
    for event in &mut extraction.events {
        for evidence in &mut event.evidence {
            evidence.start_char += start_char;
            evidence.end_char += start_char;
            if evidence.chunk_id.is_none() {
                evidence.chunk_id = chunk_id.map(str::to_owned);
            }
        }
    }

    for entity in &mut extraction.entities {
        if let Some(start) = entity.start_char.as_mut() {
            *start += start_char;
        }
        if let Some(end) = entity.end_char.as_mut() {
            *end += start_char;
        }
        if entity.chunk_id.is_none() {
            entity.chunk_id = chunk_id.map(str::to_owned);
        }
    }
}

/// Drop reasons are logged by the caller; an event survives validation when
/// its category is present, its confidence is in range and at least one
/// well-formed evidence span backs it.
pub fn validate_event(event: &ExtractedEvent) -> Result<(), String> {
    if event.category.trim().is_empty() {
        return Err("empty category".into());
    }
    if event.narrative.trim().is_empty() {
        return Err("empty narrative".into());
    }
    if !(0.0..=1.0).contains(&event.confidence) {
        return Err(format!("confidence {} outside [0,1]", event.confidence));
    }
    if event.evidence.is_empty() {
        return Err("no evidence spans".into());
    }
    for evidence in &event.evidence {
        if evidence.end_char <= evidence.start_char {
            return Err(format!(
                "evidence span [{}, {}) is empty or inverted",
                evidence.start_char, evidence.end_char
            ));
        }
        if evidence.quote.trim().is_empty() {
            return Err("empty evidence quote".into());
        }
    }
    for actor in &event.actors {
        if actor.reference.trim().is_empty() {
            return Err("actor with empty ref".into());
        }
    }

    Ok(())
}

/// Merge entities observed across chunks by normalized canonical suggestion
/// and type, unioning aliases and keeping the strongest context clues.
pub fn merge_entities(per_chunk: Vec<Vec<ExtractedEntity>>) -> Vec<ExtractedEntity> {
    let mut merged: HashMap<(String, String), ExtractedEntity> = HashMap::new();
    let mut order: Vec<(String, String)> = Vec::new();

    for entity in per_chunk.into_iter().flatten() {
        let canonical = if entity.canonical_suggestion.trim().is_empty() {
            entity.surface_form.clone()
        } else {
            entity.canonical_suggestion.clone()
        };
        let key = (canonical.to_lowercase(), entity.entity_type.to_lowercase());

        match merged.get_mut(&key) {
            None => {
                let mut entity = entity;
                entity.canonical_suggestion = canonical;
                order.push(key.clone());
                merged.insert(key, entity);
            }
            Some(existing) => {
                if !entity.surface_form.is_empty()
                    && !existing
                        .aliases_in_doc
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&entity.surface_form))
                    && !existing
                        .surface_form
                        .eq_ignore_ascii_case(&entity.surface_form)
                {
                    existing.aliases_in_doc.push(entity.surface_form.clone());
                }
                for alias in entity.aliases_in_doc {
                    if !existing
                        .aliases_in_doc
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&alias))
                    {
                        existing.aliases_in_doc.push(alias);
                    }
                }
                if existing.context_clues.role.is_none() {
                    existing.context_clues.role = entity.context_clues.role;
                }
                if existing.context_clues.org.is_none() {
                    existing.context_clues.org = entity.context_clues.org;
                }
                if existing.context_clues.email.is_none() {
                    existing.context_clues.email = entity.context_clues.email;
                }
                if entity.confidence > existing.confidence {
                    existing.confidence = entity.confidence;
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

/// Merge relationships by `(source, target, type)`, keeping the strongest
/// confidence and the first non-null evidence quote.
pub fn merge_relationships(
    per_chunk: Vec<Vec<ExtractedRelationship>>,
) -> Vec<ExtractedRelationship> {
    let mut merged: HashMap<(String, String, String), ExtractedRelationship> = HashMap::new();
    let mut order: Vec<(String, String, String)> = Vec::new();

    for relationship in per_chunk.into_iter().flatten() {
        if relationship.source_entity.trim().is_empty()
            || relationship.target_entity.trim().is_empty()
        {
            warn!("dropping relationship with empty endpoint");
            continue;
        }

        let key = (
            relationship.source_entity.to_lowercase(),
            relationship.target_entity.to_lowercase(),
            relationship.relationship_type.to_lowercase(),
        );

        match merged.get_mut(&key) {
            None => {
                order.push(key.clone());
                merged.insert(key, relationship);
            }
            Some(existing) => {
                if relationship.confidence > existing.confidence {
                    existing.confidence = relationship.confidence;
                }
                if existing.evidence_quote.is_none() {
                    existing.evidence_quote = relationship.evidence_quote;
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}
