pub mod auth;
pub mod error;
pub mod memories;
pub mod middleware;
pub mod upload;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use auth::{AppState, AppStateInner};

/// 50 MB ceiling for multipart bodies carrying image attachments.
const MAX_BODY_SIZE: usize = 50 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(root))
        .route("/ping", get(ping))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/memories", post(memories::create_memory))
        .route("/memories", get(memories::list_memories))
        .route("/memories/{memory_id}", put(memories::update_memory))
        .route("/memories/{memory_id}", delete(memories::delete_memory))
        .route("/memories/images/{image_id}", delete(memories::delete_image))
        .layer(axum_middleware::from_fn(middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Welcome to Memory Keeper API" }))
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "message": "Server is awake" }))
}
