use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

/// Kinds of source text the server ingests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Email,
    Doc,
    Chat,
    Transcript,
    Note,
}

impl ArtifactType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "email" => Some(Self::Email),
            "doc" | "document" => Some(Self::Doc),
            "chat" => Some(Self::Chat),
            "transcript" => Some(Self::Transcript),
            "note" => Some(Self::Note),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Doc => "doc",
            Self::Chat => "chat",
            Self::Transcript => "transcript",
            Self::Note => "note",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    #[default]
    Normal,
    Sensitive,
}

impl Sensitivity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "sensitive" => Some(Self::Sensitive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Sensitive => "sensitive",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityScope {
    #[default]
    Me,
    Team,
    Public,
}

impl VisibilityScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "me" => Some(Self::Me),
            "team" => Some(Self::Team),
            "public" => Some(Self::Public),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Me => "me",
            Self::Team => "team",
            Self::Public => "public",
        }
    }
}

stored_object!(ArtifactRevision, "artifact_revision", {
    artifact_uid: String,
    /// Monotonic revision label within the uid, e.g. `rev_000003`.
    revision_id: String,
    revision_seq: u32,
    /// Content-addressed handle: `art_` + first 12 hex chars of the hash.
    artifact_id: String,
    content_hash: String,
    artifact_type: ArtifactType,
    source_system: String,
    source_id: String,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    source_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    document_date: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    participants: Vec<String>,
    sensitivity: Sensitivity,
    visibility_scope: VisibilityScope,
    #[serde(default)]
    retention_policy: Option<String>,
    token_count: usize,
    is_chunked: bool,
    chunk_count: usize,
    is_latest: bool,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    ingested_at: DateTime<Utc>
});

#[derive(Deserialize)]
struct CountRow {
    count: usize,
}

impl ArtifactRevision {
    pub fn revision_label(seq: u32) -> String {
        format!("rev_{seq:06}")
    }

    pub fn mint_uid() -> String {
        format!("uid_{}", Uuid::new_v4().simple())
    }

    /// Latest revision for a logical source identity, if any.
    pub async fn find_by_source(
        db: &SurrealDbClient,
        source_system: &str,
        source_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM artifact_revision \
                 WHERE source_system = $source_system AND source_id = $source_id \
                   AND is_latest = true \
                 LIMIT 1",
            )
            .bind(("source_system", source_system.to_owned()))
            .bind(("source_id", source_id.to_owned()))
            .await?;
        let found: Vec<Self> = response.take(0)?;

        Ok(found.into_iter().next())
    }

    pub async fn latest_for_uid(
        db: &SurrealDbClient,
        artifact_uid: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM artifact_revision \
                 WHERE artifact_uid = $artifact_uid AND is_latest = true \
                 LIMIT 1",
            )
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .await?;
        let found: Vec<Self> = response.take(0)?;

        Ok(found.into_iter().next())
    }

    pub async fn find_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM artifact_revision \
                 WHERE artifact_uid = $artifact_uid AND revision_id = $revision_id \
                 LIMIT 1",
            )
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .bind(("revision_id", revision_id.to_owned()))
            .await?;
        let found: Vec<Self> = response.take(0)?;

        Ok(found.into_iter().next())
    }

    /// Latest revision carrying a content-addressed artifact id. The 12-char
    /// prefix can collide across distinct contents; pass the full hash when
    /// known to disambiguate.
    pub async fn find_by_artifact_id(
        db: &SurrealDbClient,
        artifact_id: &str,
        content_hash: Option<&str>,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM artifact_revision \
                 WHERE artifact_id = $artifact_id AND is_latest = true",
            )
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?;
        let found: Vec<Self> = response.take(0)?;

        match content_hash {
            Some(hash) => Ok(found.into_iter().find(|r| r.content_hash == hash)),
            None => Ok(found.into_iter().next()),
        }
    }

    pub async fn count_revisions(
        db: &SurrealDbClient,
        artifact_uid: &str,
    ) -> Result<usize, AppError> {
        let mut response = db
            .query(
                "SELECT count() FROM artifact_revision \
                 WHERE artifact_uid = $artifact_uid GROUP ALL",
            )
            .bind(("artifact_uid", artifact_uid.to_owned()))
            .await?;
        let rows: Vec<CountRow> = response.take(0)?;

        Ok(rows.into_iter().next().map_or(0, |row| row.count))
    }

    /// Insert this revision and demote any previous latest revision of the
    /// same uid, atomically, so `is_latest` stays unique per uid.
    pub async fn insert_as_latest(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "UPDATE artifact_revision SET is_latest = false, updated_at = time::now() \
                 WHERE artifact_uid = $artifact_uid AND is_latest = true;",
            )
            .query("CREATE type::thing('artifact_revision', $revision_record_id) CONTENT $revision;")
            .query("COMMIT TRANSACTION;")
            .bind(("artifact_uid", self.artifact_uid.clone()))
            .bind(("revision_record_id", self.id.clone()))
            .bind(("revision", self.clone()))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_revision(uid: &str, seq: u32, hash: &str) -> ArtifactRevision {
        let now = Utc::now();
        ArtifactRevision {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            artifact_uid: uid.to_string(),
            revision_id: ArtifactRevision::revision_label(seq),
            revision_seq: seq,
            artifact_id: format!("art_{}", &hash[..12.min(hash.len())]),
            content_hash: hash.to_string(),
            artifact_type: ArtifactType::Note,
            source_system: "mcp".to_string(),
            source_id: hash.to_string(),
            source_ts: None,
            title: None,
            document_date: None,
            author: None,
            participants: Vec::new(),
            sensitivity: Sensitivity::Normal,
            visibility_scope: VisibilityScope::Me,
            retention_policy: None,
            token_count: 5,
            is_chunked: false,
            chunk_count: 0,
            is_latest: true,
            ingested_at: now,
        }
    }

    async fn setup() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.build_indexes(3).await.expect("Failed to build indexes");
        db
    }

    #[test]
    fn artifact_type_parsing() {
        assert_eq!(ArtifactType::parse("note"), Some(ArtifactType::Note));
        assert_eq!(ArtifactType::parse("Email"), Some(ArtifactType::Email));
        assert_eq!(ArtifactType::parse("document"), Some(ArtifactType::Doc));
        assert_eq!(ArtifactType::parse("spreadsheet"), None);
    }

    #[test]
    fn revision_labels_are_zero_padded() {
        assert_eq!(ArtifactRevision::revision_label(1), "rev_000001");
        assert_eq!(ArtifactRevision::revision_label(42), "rev_000042");
    }

    #[tokio::test]
    async fn insert_as_latest_demotes_previous_revision() {
        let db = setup().await;

        let first = sample_revision(
            "uid_a",
            1,
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        );
        first.insert_as_latest(&db).await.expect("insert failed");

        let mut second = sample_revision(
            "uid_a",
            2,
            "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        );
        second.revision_seq = 2;
        second.insert_as_latest(&db).await.expect("insert failed");

        let latest = ArtifactRevision::latest_for_uid(&db, "uid_a")
            .await
            .expect("lookup failed")
            .expect("no latest revision");
        assert_eq!(latest.revision_id, "rev_000002");

        // Exactly one revision may carry is_latest per uid.
        let mut response = db
            .query("SELECT * FROM artifact_revision WHERE artifact_uid = 'uid_a' AND is_latest = true")
            .await
            .expect("query failed");
        let latest_rows: Vec<ArtifactRevision> = response.take(0).expect("take failed");
        assert_eq!(latest_rows.len(), 1);

        assert_eq!(
            ArtifactRevision::count_revisions(&db, "uid_a")
                .await
                .expect("count failed"),
            2
        );
    }

    #[tokio::test]
    async fn source_lookup_finds_latest() {
        let db = setup().await;

        let revision = sample_revision(
            "uid_b",
            1,
            "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc",
        );
        revision.insert_as_latest(&db).await.expect("insert failed");

        let found = ArtifactRevision::find_by_source(&db, "mcp", &revision.source_id)
            .await
            .expect("lookup failed");
        assert!(found.is_some());

        let missing = ArtifactRevision::find_by_source(&db, "gmail", "nope")
            .await
            .expect("lookup failed");
        assert!(missing.is_none());
    }
}
