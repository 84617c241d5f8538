use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EntityEdge, "entity_edge", {
    source_entity_id: String,
    target_entity_id: String,
    relationship_type: String,
    artifact_uid: String,
    revision_id: String,
    confidence: f32,
    #[serde(default)]
    evidence_quote: Option<String>
});

impl EntityEdge {
    /// Upsert on the `(source, target, type, artifact_uid)` tuple. A
    /// colliding write keeps the strongest confidence and prefers a non-null
    /// evidence quote.
    pub async fn upsert_merge(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "LET $existing = (SELECT * FROM entity_edge \
                 WHERE source_entity_id = $source_entity_id \
                   AND target_entity_id = $target_entity_id \
                   AND relationship_type = $relationship_type \
                   AND artifact_uid = $artifact_uid \
                 LIMIT 1);",
            )
            .query(
                "IF array::len($existing) == 0 THEN \
                   (CREATE type::thing('entity_edge', $edge.id) CONTENT $edge) \
                 ELSE \
                   (UPDATE $existing[0].id SET \
                      confidence = math::max([confidence, $confidence]), \
                      evidence_quote = $evidence_quote ?? evidence_quote, \
                      revision_id = $revision_id, \
                      updated_at = time::now()) \
                 END;",
            )
            .query("COMMIT TRANSACTION;")
            .bind(("source_entity_id", self.source_entity_id.clone()))
            .bind(("target_entity_id", self.target_entity_id.clone()))
            .bind(("relationship_type", self.relationship_type.clone()))
            .bind(("artifact_uid", self.artifact_uid.clone()))
            .bind(("revision_id", self.revision_id.clone()))
            .bind(("confidence", self.confidence))
            .bind(("evidence_quote", self.evidence_quote.clone()))
            .bind(("edge", self.clone()))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Edges touching any of the given entities, optionally restricted to a
    /// set of relationship types.
    pub async fn for_entities(
        db: &SurrealDbClient,
        entity_ids: &[String],
        relationship_types: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = if relationship_types.is_empty() {
            "SELECT * FROM entity_edge \
             WHERE source_entity_id IN $entity_ids OR target_entity_id IN $entity_ids"
        } else {
            "SELECT * FROM entity_edge \
             WHERE (source_entity_id IN $entity_ids OR target_entity_id IN $entity_ids) \
               AND relationship_type IN $relationship_types"
        };

        let mut response = db
            .query(sql)
            .bind(("entity_ids", entity_ids.to_vec()))
            .bind(("relationship_types", relationship_types.to_vec()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        Ok(rows)
    }

    pub async fn delete_for_artifact(
        db: &SurrealDbClient,
        artifact_uid: &str,
    ) -> Result<usize, AppError> {
        let mut response = db
            .query("DELETE entity_edge WHERE artifact_uid = $artifact_uid RETURN BEFORE")
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .await?;
        let removed: Vec<Self> = response.take(0)?;

        Ok(removed.len())
    }
}
