//! Instance routes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use powerport_core::orchestrator::DeployRequest;
use powerport_core::types::Instance;
use powerport_core::Error;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult, Reply};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/instances", get(list_instances).post(deploy_instance))
        .route("/instances/deploy", post(deploy_instance))
        .route("/instances/{id}", get(get_instance).delete(delete_instance))
        .route("/instances/{id}/suspend", post(suspend_instance))
        .route("/instances/{id}/unsuspend", post(unsuspend_instance))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Deployed {
    instance_id: String,
    container_id: String,
    volume_id: String,
}

async fn list_instances(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Instance>> {
    Ok(Reply::ok(state.instances.list()?))
}

async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Instance> {
    Ok(Reply::ok(state.instances.get(&id)?))
}

async fn deploy_instance(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<Deployed> {
    let Json(request) = body?;

    let instance = state.instances.deploy(&request).await.map_err(|e| match e {
        Error::RemoteRejected { .. } => ApiError::from(e).with_message("Failed to deploy container"),
        Error::RemoteUnavailable(_) | Error::RemoteMalformed(_) => {
            ApiError::from(e).with_message("Failed to create container")
        }
        other => ApiError::from(other),
    })?;

    Ok(Reply::created(Deployed {
        instance_id: instance.id,
        container_id: instance.container_id,
        volume_id: instance.volume_id,
    })
    .with_message("Instance created successfully"))
}

async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.instances.delete(&id).await?;
    Ok(Reply::message("Instance deleted successfully"))
}

async fn suspend_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Instance> {
    let instance = state.instances.suspend(&id).await?;
    Ok(Reply::ok(instance).with_message(format!("Instance {id} has been suspended")))
}

async fn unsuspend_instance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Instance> {
    let instance = state.instances.unsuspend(&id).await?;
    Ok(Reply::ok(instance).with_message(format!("Instance {id} has been unsuspended")))
}
