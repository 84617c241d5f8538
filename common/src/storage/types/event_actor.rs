use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::semantic_event::ActorRole;

stored_object!(EventActor, "event_actor", {
    event_id: String,
    entity_id: String,
    role: ActorRole
});

impl EventActor {
    pub async fn for_events(
        db: &SurrealDbClient,
        event_ids: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query("SELECT * FROM event_actor WHERE event_id IN $event_ids")
            .bind(("event_ids", event_ids.to_vec()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        Ok(rows)
    }

    pub async fn for_entities(
        db: &SurrealDbClient,
        entity_ids: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query("SELECT * FROM event_actor WHERE entity_id IN $entity_ids")
            .bind(("entity_ids", entity_ids.to_vec()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        Ok(rows)
    }
}
