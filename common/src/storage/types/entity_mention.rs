use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EntityMention, "entity_mention", {
    entity_id: String,
    artifact_uid: String,
    revision_id: String,
    #[serde(default)]
    chunk_id: Option<String>,
    start_char: usize,
    end_char: usize,
    surface_form: String
});

impl EntityMention {
    pub async fn delete_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<usize, AppError> {
        let mut response = db
            .query(
                "DELETE entity_mention \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id \
                 RETURN BEFORE",
            )
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .bind(("revision_id", revision_id.to_owned()))
            .await?;
        let removed: Vec<Self> = response.take(0)?;

        Ok(removed.len())
    }

    pub async fn entity_ids_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let mut response = db
            .query(
                "SELECT VALUE entity_id FROM entity_mention \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id",
            )
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .bind(("revision_id", revision_id.to_owned()))
            .await?;
        let ids: Vec<String> = response.take(0)?;

        Ok(ids)
    }
}
