//! API route modules.

pub mod health;
pub mod instances;
pub mod nodes;
pub mod streams;
pub mod users;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::middleware::auth_middleware;
use crate::state::AppState;

pub const API_VERSION: &str = "v1";
pub const BASE_PATH: &str = "/api/v1";

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/api", get(health::api_index));

    // Protected routes (require API key)
    let protected_routes = Router::new()
        .merge(users::router())
        .merge(instances::router())
        .merge(nodes::router())
        .merge(streams::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let v1 = Router::new()
        .merge(nodes::daemon_router())
        .merge(protected_routes);

    Router::new()
        .merge(public_routes)
        .nest(BASE_PATH, v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
