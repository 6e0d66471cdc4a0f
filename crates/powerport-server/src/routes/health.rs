//! Health check and API index endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::Reply;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: HealthComponents,
    pub metrics: HealthMetrics,
}

#[derive(Serialize)]
pub struct HealthComponents {
    pub database: bool,
}

#[derive(Serialize)]
pub struct HealthMetrics {
    pub nodes: usize,
    pub instances: usize,
    pub stream_sessions: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let db_healthy = state.store.ping().is_ok();

    let nodes = state.nodes.list().map(|n| n.len()).unwrap_or(0);
    let instances = state.instances.list().map(|i| i.len()).unwrap_or(0);

    let status = if db_healthy { "healthy" } else { "degraded" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: HealthComponents {
            database: db_healthy,
        },
        metrics: HealthMetrics {
            nodes,
            instances,
            stream_sessions: state.streams.active_sessions(),
        },
    })
}

/// `GET /api`: versioned endpoint index
pub async fn api_index() -> Reply<Value> {
    let base = super::BASE_PATH;
    Reply::ok(json!({
        "name": "PowerPort API",
        "version": super::API_VERSION,
        "authentication": "API key required in X-API-Key header or as a query parameter \"key\"",
        "endpoints": [
            { "path": format!("{base}/users"), "methods": ["GET", "POST"], "description": "Manage users" },
            { "path": format!("{base}/users/lookup"), "methods": ["GET"], "description": "Find a user by email or username" },
            { "path": format!("{base}/users/:id"), "methods": ["GET", "PATCH", "DELETE"], "description": "Get, update or delete user" },
            { "path": format!("{base}/users/:id/change-password"), "methods": ["POST"], "description": "Change a user's password" },
            { "path": format!("{base}/users/:id/instances"), "methods": ["GET"], "description": "Instances owned by a user" },
            { "path": format!("{base}/instances"), "methods": ["GET", "POST"], "description": "Manage instances" },
            { "path": format!("{base}/instances/deploy"), "methods": ["POST"], "description": "Deploy a new instance" },
            { "path": format!("{base}/instances/:id"), "methods": ["GET", "DELETE"], "description": "Get or delete an instance" },
            { "path": format!("{base}/instances/:id/suspend"), "methods": ["POST"], "description": "Suspend an instance" },
            { "path": format!("{base}/instances/:id/unsuspend"), "methods": ["POST"], "description": "Unsuspend an instance" },
            { "path": format!("{base}/nodes"), "methods": ["GET", "POST"], "description": "Manage nodes" },
            { "path": format!("{base}/nodes/:id"), "methods": ["GET", "DELETE"], "description": "Get or delete a node" },
            { "path": format!("{base}/nodes/:id/check"), "methods": ["POST"], "description": "Run a health check" },
            { "path": format!("{base}/nodes/:id/configure-command"), "methods": ["GET"], "description": "Daemon configure command" },
            { "path": format!("{base}/exec/:id"), "methods": ["GET"], "description": "Console WebSocket" },
            { "path": format!("{base}/stats/:id"), "methods": ["GET"], "description": "Resource stats WebSocket" }
        ]
    }))
    .with_message("API documentation")
}
