use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use common::storage::types::extraction_job::{ExtractionJob, QueueDepth};
use ingestion_pipeline::RememberRequest;
use retrieval_pipeline::RecallRequest;

use crate::{api_state::ApiState, error::ApiError};

/// The JSON-RPC-like envelope of the MCP transport: every call is
/// `{method: "tools/call", params: {name, arguments}}`.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: RpcParams,
}

#[derive(Debug, Deserialize, Default)]
pub struct RpcParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Serialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct ForgetArgs {
    id: String,
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    status: &'static str,
    vector_store: ComponentHealth,
    relational_store: ComponentHealth,
    embedding_provider: ComponentHealth,
    queue: QueueDepth,
}

#[derive(Debug, Serialize)]
struct ComponentHealth {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(err) => Self {
                ok: false,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Dispatch for the four tools. Success wraps the tool's JSON result in a
/// text content item; failures map to the coded error envelope.
pub async fn tools_call(
    State(state): State<ApiState>,
    Json(request): Json<RpcRequest>,
) -> Result<Json<RpcResponse>, ApiError> {
    if request.method != "tools/call" {
        return Err(ApiError::Validation(format!(
            "unsupported method '{}'",
            request.method
        )));
    }

    info!(tool = %request.params.name, "tool call received");

    match request.params.name.as_str() {
        "remember" => {
            let args: RememberRequest = parse_arguments(request.params.arguments)?;
            let outcome = state.ingestor.remember(args).await?;
            wrap(&outcome)
        }
        "recall" => {
            let args: RecallRequest = parse_arguments(request.params.arguments)?;
            let response = state.engine.recall(args).await?;
            wrap(&response)
        }
        "forget" => {
            let args: ForgetArgs = parse_arguments(request.params.arguments)?;
            let outcome = state.ingestor.forget(&args.id, args.confirm).await?;
            wrap(&outcome)
        }
        "status" => {
            let payload = status_payload(&state).await?;
            wrap(&payload)
        }
        other => Err(ApiError::Validation(format!(
            "unknown tool '{other}'; expected remember, recall, forget or status"
        ))),
    }
}

fn parse_arguments<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T, ApiError> {
    serde_json::from_value(arguments)
        .map_err(|err| ApiError::Validation(format!("invalid arguments: {err}")))
}

fn wrap<T: Serialize>(value: &T) -> Result<Json<RpcResponse>, ApiError> {
    let text = serde_json::to_string(value)
        .map_err(|err| ApiError::Internal(format!("response serialization failed: {err}")))?;

    Ok(Json(RpcResponse {
        content: vec![ContentItem {
            kind: "text".to_string(),
            text,
        }],
    }))
}

async fn status_payload(state: &ApiState) -> Result<StatusPayload, ApiError> {
    let relational = state.db.ping().await.map_err(|e| e.to_string());
    let vector = state.ingestor.vectors().ping().await.map_err(|e| e.to_string());
    let embedding = state.embedder.ping().await.map_err(|e| e.to_string());
    let queue = ExtractionJob::queue_depth(&state.db).await?;

    let all_ok = relational.is_ok() && vector.is_ok() && embedding.is_ok();

    Ok(StatusPayload {
        status: if all_ok { "ok" } else { "degraded" },
        vector_store: ComponentHealth::from_result(vector),
        relational_store: ComponentHealth::from_result(relational),
        embedding_provider: ComponentHealth::from_result(embedding),
        queue,
    })
}
