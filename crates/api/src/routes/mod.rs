//! API routes

pub mod conversations;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, chat::ws_handler, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        // Conversation routes
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations/:conversation_id", get(conversations::get_conversation))
        .route("/conversations/:conversation_id", delete(conversations::delete_conversation))
        .route("/conversations/:conversation_id/messages", get(conversations::list_messages))
        // Message routes
        .route("/messages/:message_id/read", post(conversations::mark_message_read))
        .route("/messages/:message_id", delete(conversations::delete_message))
        // Presence lookup
        .route("/presence/:user_id", get(conversations::get_presence))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    // WebSocket routes (auth handled in handler via query parameter)
    let websocket_routes = Router::new().route("/ws/chat", get(ws_handler));

    // Combine API routes under /api/v1 prefix
    let api_v1_routes = Router::new()
        .merge(protected_api_routes)
        .merge(websocket_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        // Global request body size limit; chat payloads are small
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
