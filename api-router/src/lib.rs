use api_state::ApiState;
use axum::{
    routing::{get, post},
    Router,
};
use routes::{liveness::live, readiness::ready, rpc::tools_call};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the memory server: the MCP tool-call endpoint plus probe
/// routes for orchestration.
pub fn api_routes(state: &ApiState) -> Router {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/mcp", post(tools_call))
        .with_state(state.clone())
}
