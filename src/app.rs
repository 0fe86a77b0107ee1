use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::security;
use crate::state::AppState;

/// Build the full application router. Exposed so integration tests can
/// drive the service without binding a socket.
pub fn build_router(state: AppState) -> Router {
    // Session-scoped routes: everything under /api/v1 runs behind the
    // cookie middleware.
    let api_routes = Router::new()
        .route("/chat/", post(handlers::chat::chat_handler))
        .route(
            "/auth/test-connection",
            post(handlers::auth::test_connection_handler),
        )
        .route("/auth/get-session", get(handlers::auth::get_session_handler))
        .route(
            "/auth/clear-session",
            delete(handlers::auth::clear_session_handler),
        )
        .layer(middleware::from_fn(security::session::session_middleware));

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/healthz", get(handlers::health::health_check))
        .nest("/api/v1", api_routes)
        .with_state(state)
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}
