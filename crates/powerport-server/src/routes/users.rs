//! User routes.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use powerport_core::types::{Instance, UserView};
use powerport_core::users::{NewUser, UserPatch};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ApiResult, Reply};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/lookup", get(lookup_user))
        .route(
            "/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/users/{id}/change-password", post(change_password))
        .route("/users/{id}/instances", get(list_user_instances))
}

async fn list_users(State(state): State<Arc<AppState>>) -> ApiResult<Vec<UserView>> {
    Ok(Reply::ok(state.users.list()?))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<UserView> {
    Ok(Reply::ok(state.users.view(&id)?))
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    #[serde(rename = "type", default)]
    field: String,
    #[serde(default)]
    value: String,
}

async fn lookup_user(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<UserView> {
    Ok(Reply::ok(state.users.lookup(&query.field, &query.value)?))
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> ApiResult<UserView> {
    let Json(request) = body?;
    let user = state.users.create(request).await?;
    Ok(Reply::created(user).with_message("User created successfully"))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<UserPatch>, JsonRejection>,
) -> ApiResult<UserView> {
    let Json(patch) = body?;
    let user = state.users.update(&id, patch).await?;
    Ok(Reply::ok(user).with_message("User updated successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    new_password: Option<String>,
}

async fn change_password(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(request) = body?;
    state
        .users
        .change_password(&id, request.new_password.as_deref())
        .await?;
    Ok(Reply::message("Password changed successfully"))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.users.delete(&id).await?;
    Ok(Reply::message("User deleted successfully"))
}

async fn list_user_instances(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Instance>> {
    Ok(Reply::ok(state.instances.list_for_user(&id)?))
}
