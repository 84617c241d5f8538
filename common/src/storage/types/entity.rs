use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Canonical entity kinds. Anything the extractor suggests outside this set
/// lands in `Other`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Org,
    Project,
    Object,
    Place,
    #[default]
    Other,
}

impl EntityType {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "person" => Self::Person,
            "org" | "organization" => Self::Org,
            "project" => Self::Project,
            "object" => Self::Object,
            "place" => Self::Place,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Org => "org",
            Self::Project => "project",
            Self::Object => "object",
            Self::Place => "place",
            Self::Other => "other",
        }
    }
}

stored_object!(Entity, "entity", {
    entity_type: EntityType,
    canonical_name: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    organization: Option<String>,
    #[serde(default)]
    email: Option<String>,
    /// Embedding of the disambiguation context, maintained as a running
    /// average weighted by mention count.
    context_embedding: Vec<f32>,
    needs_review: bool,
    first_seen_artifact_uid: String,
    first_seen_revision_id: String,
    mention_count: u32
});

impl Entity {
    /// Candidates whose canonical name matches any of the given surface
    /// forms, restricted to one entity type.
    pub async fn find_by_names(
        db: &SurrealDbClient,
        entity_type: EntityType,
        names: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query(
                "SELECT * FROM entity \
                 WHERE entity_type = $entity_type \
                   AND string::lowercase(canonical_name) IN $names",
            )
            .bind(("entity_type", entity_type))
            .bind((
                "names",
                names.iter().map(|n| n.to_lowercase()).collect::<Vec<_>>(),
            ))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        Ok(rows)
    }

    pub async fn find_by_email(
        db: &SurrealDbClient,
        entity_type: EntityType,
        email: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM entity \
                 WHERE entity_type = $entity_type \
                   AND string::lowercase(email) = $email",
            )
            .bind(("entity_type", entity_type))
            .bind(("email", email.to_lowercase()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        Ok(rows)
    }

    pub async fn find_by_ids(
        db: &SurrealDbClient,
        entity_ids: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query(
                "SELECT * FROM entity \
                 WHERE record::id(id) IN $entity_ids",
            )
            .bind(("entity_ids", entity_ids.to_vec()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        Ok(rows)
    }

    /// Fold a fresh observation into an existing entity: bump the mention
    /// count, move the context embedding toward the new context by a
    /// mention-count-weighted average, and fill in context fields that were
    /// previously unknown. The canonical name is only replaced when the
    /// caller decided the new one is clearly more specific.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_merge(
        db: &SurrealDbClient,
        entity_id: &str,
        context_embedding: Vec<f32>,
        canonical_name: Option<String>,
        role: Option<String>,
        organization: Option<String>,
        email: Option<String>,
    ) -> Result<(), AppError> {
        let response = db
            .client
            .query(
                "UPDATE type::thing('entity', $entity_id) SET \
                   context_embedding = $context_embedding, \
                   mention_count += 1, \
                   canonical_name = $canonical_name ?? canonical_name, \
                   role = role ?? $role, \
                   organization = organization ?? $organization, \
                   email = email ?? $email, \
                   updated_at = time::now();",
            )
            .bind(("entity_id", entity_id.to_owned()))
            .bind(("context_embedding", context_embedding))
            .bind(("canonical_name", canonical_name))
            .bind(("role", role))
            .bind(("organization", organization))
            .bind(("email", email))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }
}
