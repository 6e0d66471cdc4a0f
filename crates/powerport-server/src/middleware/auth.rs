//! API key middleware for powerport-server.

use axum::{
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use powerport_core::auth::validate_api_key;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const USER_HEADER: &str = "X-PowerPort-User";

/// Authentication context extracted from request
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Panel user the caller acts for (`X-PowerPort-User` or `?user=`)
    pub user_id: Option<String>,
}

/// Authentication middleware for axum.
///
/// Accepts the key from the `X-API-Key` header or the `key` query parameter.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let candidate = header(&request, API_KEY_HEADER).or_else(|| query.get("key").cloned());
    let key = validate_api_key(&state.store, candidate.as_deref().unwrap_or_default())?;
    debug!(key = key.name.as_deref().unwrap_or("unnamed"), "API key accepted");

    let user_id = header(&request, USER_HEADER).or_else(|| query.get("user").cloned());

    request.extensions_mut().insert(AuthContext { user_id });

    Ok(next.run(request).await)
}

fn header(request: &Request<Body>, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}
