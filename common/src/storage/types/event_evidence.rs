use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EventEvidence, "event_evidence", {
    event_id: String,
    artifact_uid: String,
    revision_id: String,
    #[serde(default)]
    chunk_id: Option<String>,
    start_char: usize,
    end_char: usize,
    /// Exact span from the source text justifying the event.
    quote: String
});

impl EventEvidence {
    pub async fn for_event(
        db: &SurrealDbClient,
        event_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM event_evidence WHERE event_id = $event_id \
                 ORDER BY start_char ASC",
            )
            .bind(("event_id", event_id.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;

        Ok(rows)
    }
}
