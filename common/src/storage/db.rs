use crate::error::AppError;

use super::types::StoredObject;
use std::{ops::Deref, sync::Arc};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

/// Thin wrapper around a SurrealDB connection. Both the relational tables and
/// the vector collections live on this handle; the vector side is wrapped
/// separately by [`super::vector::VectorStore`].
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define every index the pipelines rely on. `embedding_dimensions` must
    /// match the configured embedding provider or vector queries return
    /// nothing useful.
    pub async fn build_indexes(&self, embedding_dimensions: usize) -> Result<(), Error> {
        // Vector collections (content + chunks) and the embedding-typed
        // columns on events and entities.
        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_vector_content_embedding ON vector_content FIELDS embedding HNSW DIMENSION {embedding_dimensions}"
            ))
            .await?;
        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_vector_chunk_embedding ON vector_chunk FIELDS embedding HNSW DIMENSION {embedding_dimensions}"
            ))
            .await?;
        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_entity_context_embedding ON entity FIELDS context_embedding HNSW DIMENSION {embedding_dimensions}"
            ))
            .await?;
        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_event_embedding ON semantic_event FIELDS embedding HNSW DIMENSION {embedding_dimensions}"
            ))
            .await?;

        // Revision lookups: by logical source identity and by uid.
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_revision_source ON artifact_revision FIELDS source_system, source_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_revision_uid ON artifact_revision FIELDS artifact_uid")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_revision_artifact_id ON artifact_revision FIELDS artifact_id")
            .await?;

        // Job queue: one job per (artifact_uid, revision_id, job_type),
        // claims scan by status.
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_identity ON extraction_job FIELDS artifact_uid, revision_id, job_type UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_status ON extraction_job FIELDS status")
            .await?;

        // Entity graph uniqueness constraints.
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_alias_identity ON entity_alias FIELDS entity_id, surface_form UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_entity_email ON entity FIELDS email")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_actor_identity ON event_actor FIELDS event_id, entity_id UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_subject_identity ON event_subject FIELDS event_id, entity_id UNIQUE")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_edge_identity ON entity_edge FIELDS source_entity_id, target_entity_id, relationship_type, artifact_uid UNIQUE")
            .await?;

        // Event lookups by owning revision.
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_event_revision ON semantic_event FIELDS artifact_uid, revision_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_evidence_event ON event_evidence FIELDS event_id")
            .await?;

        Ok(())
    }

    /// Cheap connectivity probe for `status()`.
    pub async fn ping(&self) -> Result<(), Error> {
        self.client.query("RETURN 1").await?.check()?;
        Ok(())
    }

    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject,
    {
        self.client.select(T::table_name()).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Probe, "probe", {
        label: String
    });

    #[tokio::test]
    async fn crud_roundtrip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        db.build_indexes(3).await.expect("Failed to build indexes");

        let probe = Probe {
            id: "p1".to_string(),
            label: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(probe.clone()).await.expect("store failed");
        assert!(stored.is_some());

        let fetched = db.get_item::<Probe>("p1").await.expect("get failed");
        assert_eq!(fetched, Some(probe.clone()));

        let all = db
            .get_all_stored_items::<Probe>()
            .await
            .expect("select failed");
        assert!(all.contains(&probe));

        let deleted = db.delete_item::<Probe>("p1").await.expect("delete failed");
        assert_eq!(deleted, Some(probe));

        assert_eq!(db.get_item::<Probe>("p1").await.expect("get failed"), None);
    }

    #[tokio::test]
    async fn ping_succeeds_on_live_connection() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ping().await.expect("ping failed");
    }
}
