use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EntityAlias, "entity_alias", {
    entity_id: String,
    surface_form: String
});

impl EntityAlias {
    /// Entity ids carrying any of the given surface forms as an alias.
    /// Matching is case-insensitive; the stored form keeps its casing.
    pub async fn entity_ids_for_forms(
        db: &SurrealDbClient,
        forms: &[String],
    ) -> Result<Vec<String>, AppError> {
        if forms.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query(
                "SELECT VALUE entity_id FROM entity_alias \
                 WHERE string::lowercase(surface_form) IN $forms",
            )
            .bind((
                "forms",
                forms.iter().map(|f| f.to_lowercase()).collect::<Vec<_>>(),
            ))
            .await?;
        let ids: Vec<String> = response.take(0)?;

        Ok(ids)
    }

    pub async fn forms_for_entity(
        db: &SurrealDbClient,
        entity_id: &str,
    ) -> Result<Vec<String>, AppError> {
        let mut response = db
            .query("SELECT VALUE surface_form FROM entity_alias WHERE entity_id = $entity_id")
            .bind(("entity_id", entity_id.to_owned()))
            .await?;
        let forms: Vec<String> = response.take(0)?;

        Ok(forms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn alias_lookup_matches_case_insensitively() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.build_indexes(3).await.expect("Failed to build indexes");

        let now = Utc::now();
        let alias = EntityAlias {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            entity_id: "entity-1".to_string(),
            surface_form: "A. Chen".to_string(),
        };
        db.store_item(alias).await.expect("store failed");

        let ids = EntityAlias::entity_ids_for_forms(&db, &["a. chen".to_string()])
            .await
            .expect("lookup failed");
        assert_eq!(ids, vec!["entity-1".to_string()]);

        let forms = EntityAlias::forms_for_entity(&db, "entity-1")
            .await
            .expect("lookup failed");
        assert_eq!(forms, vec!["A. Chen".to_string()]);
    }
}
