use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::{db::SurrealDbClient, types::deserialize_flexible_id};

/// Search breadth hint for the HNSW index, mirroring the `<|n,EF|>` operator.
const KNN_EF: usize = 100;

/// The two named collections of the vector store. Full-artifact vectors live
/// in `content`, chunk vectors in `chunks`; both are keyed by
/// content-addressed ids so re-ingesting identical text overwrites in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorCollection {
    Content,
    Chunks,
}

impl VectorCollection {
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Content => "vector_content",
            Self::Chunks => "vector_chunk",
        }
    }
}

/// One entry in a vector collection: the embedded text plus the metadata the
/// retrieval engine filters and hydrates from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub artifact_id: String,
    pub artifact_uid: String,
    pub revision_id: String,
    #[serde(default)]
    pub chunk_index: Option<u32>,
    #[serde(default)]
    pub start_char: Option<usize>,
    #[serde(default)]
    pub end_char: Option<usize>,
    pub token_count: usize,
    pub content_hash: String,
    #[serde(default)]
    pub title: Option<String>,
    pub sensitivity: String,
    pub visibility_scope: String,
    pub ingested_at: DateTime<Utc>,
}

/// A nearest-neighbor match with its cosine similarity.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorHit {
    #[serde(flatten)]
    pub record: VectorRecord,
    pub score: f32,
}

/// Optional metadata constraints applied inside the vector query.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub artifact_uid: Option<String>,
    pub visibility_scope: Option<String>,
    pub sensitivity: Option<String>,
}

impl VectorFilter {
    fn is_empty(&self) -> bool {
        self.artifact_uid.is_none() && self.visibility_scope.is_none() && self.sensitivity.is_none()
    }
}

/// Client for the dense-vector side of storage. A separate component from the
/// relational tables even though both ride the same SurrealDB connection.
#[derive(Clone)]
pub struct VectorStore {
    db: Arc<SurrealDbClient>,
}

impl VectorStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Upsert a batch of records under their content-addressed ids in a
    /// single transaction.
    pub async fn upsert(
        &self,
        collection: VectorCollection,
        records: Vec<VectorRecord>,
    ) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }

        let response = self
            .db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "FOR $record IN $records {{ UPSERT type::thing('{table}', $record.id) CONTENT $record; }};",
                table = collection.table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("records", records))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Nearest-neighbor search returning the `take` closest records by
    /// cosine similarity, optionally constrained by metadata.
    pub async fn query(
        &self,
        collection: VectorCollection,
        embedding: Vec<f32>,
        take: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<VectorHit>, AppError> {
        let filter = filter.unwrap_or_default();
        let mut conditions = vec![format!("embedding <|{take},{KNN_EF}|> $embedding")];
        if filter.artifact_uid.is_some() {
            conditions.push("artifact_uid = $artifact_uid".to_string());
        }
        if filter.visibility_scope.is_some() {
            conditions.push("visibility_scope = $visibility_scope".to_string());
        }
        if filter.sensitivity.is_some() {
            conditions.push("sensitivity = $sensitivity".to_string());
        }

        let sql = format!(
            "SELECT *, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM {table} WHERE {condition} ORDER BY score DESC LIMIT {take}",
            table = collection.table_name(),
            condition = conditions.join(" AND "),
        );

        let mut query = self.db.client.query(sql).bind(("embedding", embedding));
        if let Some(uid) = filter.artifact_uid {
            query = query.bind(("artifact_uid", uid));
        }
        if let Some(scope) = filter.visibility_scope {
            query = query.bind(("visibility_scope", scope));
        }
        if let Some(sensitivity) = filter.sensitivity {
            query = query.bind(("sensitivity", sensitivity));
        }

        let hits: Vec<VectorHit> = query.await?.take(0)?;

        Ok(hits)
    }

    pub async fn get(
        &self,
        collection: VectorCollection,
        id: &str,
    ) -> Result<Option<VectorRecord>, AppError> {
        let record: Option<VectorRecord> = self
            .db
            .client
            .select((collection.table_name(), id))
            .await?;

        Ok(record)
    }

    /// All chunk records for an artifact, ordered by chunk index.
    pub async fn chunks_for_artifact(
        &self,
        artifact_id: &str,
    ) -> Result<Vec<VectorRecord>, AppError> {
        let chunks: Vec<VectorRecord> = self
            .db
            .client
            .query(format!(
                "SELECT * FROM {table} WHERE artifact_id = $artifact_id ORDER BY chunk_index ASC",
                table = VectorCollection::Chunks.table_name(),
            ))
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    /// Delete records by id. Used both by `forget` and by the ingest
    /// compensation path when the relational write fails after the vector
    /// upserts landed.
    pub async fn delete_ids(
        &self,
        collection: VectorCollection,
        ids: Vec<String>,
    ) -> Result<usize, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let count = ids.len();
        let response = self
            .db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "FOR $id IN $ids {{ DELETE type::thing('{table}', $id); }};",
                table = collection.table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("ids", ids))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(count)
    }

    /// Delete every record belonging to an artifact id, returning the number
    /// of rows removed.
    pub async fn delete_artifact(&self, artifact_id: &str) -> Result<usize, AppError> {
        let mut deleted = 0;

        let content: Vec<VectorRecord> = self
            .db
            .client
            .query(format!(
                "SELECT * FROM {table} WHERE artifact_id = $artifact_id",
                table = VectorCollection::Content.table_name(),
            ))
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?
            .take(0)?;
        deleted += self
            .delete_ids(
                VectorCollection::Content,
                content.into_iter().map(|r| r.id).collect(),
            )
            .await?;

        let chunks = self.chunks_for_artifact(artifact_id).await?;
        deleted += self
            .delete_ids(
                VectorCollection::Chunks,
                chunks.into_iter().map(|c| c.id).collect(),
            )
            .await?;

        Ok(deleted)
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.db.ping().await.map_err(AppError::Database)
    }
}
