//! Node routes.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use powerport_core::types::Node;
use powerport_core::NewNode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiResult, Reply};
use crate::state::AppState;

/// Routes behind the API key
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/nodes", get(list_nodes).post(create_node))
        .route("/nodes/{id}", get(get_node).delete(delete_node))
        .route("/nodes/{id}/check", post(check_node))
        .route("/nodes/{id}/configure-command", get(configure_command))
}

/// Routes called by daemons, authenticated by the configure key itself
pub fn daemon_router() -> Router<Arc<AppState>> {
    Router::new().route("/nodes/configure", post(configure_node))
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Node>> {
    Ok(Reply::ok(state.nodes.list()?))
}

async fn get_node(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Node> {
    Ok(Reply::ok(state.nodes.get(&id)?))
}

async fn create_node(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewNode>, JsonRejection>,
) -> ApiResult<Node> {
    let Json(spec) = body?;
    let node = state.nodes.create(spec).await?;
    Ok(Reply::created(node).with_message("Node created successfully"))
}

async fn delete_node(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<()> {
    state.nodes.delete(&id).await?;
    Ok(Reply::message("Node deleted successfully"))
}

async fn check_node(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Node> {
    Ok(Reply::ok(state.nodes.check(&id).await?))
}

#[derive(Debug, Serialize)]
struct ConfigureCommand {
    command: String,
}

async fn configure_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ConfigureCommand> {
    let command = state
        .nodes
        .configure_command(&id, &state.config.panel_url)
        .await?;
    Ok(Reply::ok(ConfigureCommand { command }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigureQuery {
    #[serde(default)]
    auth_key: String,
    #[serde(default)]
    configure_key: String,
}

async fn configure_node(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigureQuery>,
) -> ApiResult<Node> {
    let node = state
        .nodes
        .bind_daemon(&query.configure_key, &query.auth_key)
        .await?;
    Ok(Reply::ok(node).with_message("Node configured successfully"))
}
