use axum::http::StatusCode;

/// Process-is-up probe; no dependencies checked.
pub async fn live() -> StatusCode {
    StatusCode::OK
}
