use axum::{extract::State, http::StatusCode};
use tracing::warn;

use crate::api_state::ApiState;

/// Ready only when the store answers.
pub async fn ready(State(state): State<ApiState>) -> StatusCode {
    match state.db.ping().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            warn!(error = %err, "readiness probe failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
