use axum::{
    extract::{Extension, Query, State},
    Json,
};
use tracing::info;

use crate::models::chat::{SessionSnapshot, TestConnectionParams, TestConnectionResponse};
use crate::security::SessionIdent;
use crate::services::credentials::Credentials;
use crate::state::AppState;
use crate::utils::error::ApiError;

/// POST /api/v1/auth/test-connection
///
/// Validates credentials with a minimal upstream round-trip. 200 on
/// success, 400 on missing credentials, 401 when the provider rejects
/// them, 504 on timeout.
pub async fn test_connection_handler(
    State(state): State<AppState>,
    Query(params): Query<TestConnectionParams>,
) -> Result<Json<TestConnectionResponse>, ApiError> {
    let credentials = Credentials::from_overrides(
        params.api_key.as_deref(),
        params.api_url.as_deref(),
        params.use_model.as_deref(),
        &state.settings,
    )?;

    match state.llm.test_connection(&credentials).await {
        Ok(message) => {
            info!("Test connection OK for {}", credentials.api_url);
            Ok(Json(TestConnectionResponse { message }))
        }
        Err(e @ ApiError::Timeout(_)) => Err(e),
        Err(e @ ApiError::Configuration(_)) => Err(e),
        Err(e @ ApiError::Authentication(_)) => Err(e),
        // Anything else (transport, provider-side, malformed body) means
        // the supplied credentials could not be verified.
        Err(e) => Err(ApiError::Authentication(format!(
            "Invalid API credentials: {}",
            e
        ))),
    }
}

/// GET /api/v1/auth/get-session
pub async fn get_session_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionIdent>,
) -> Json<SessionSnapshot> {
    state.store.get_or_create(&session.id);
    Json(SessionSnapshot {
        session_id: session.id.clone(),
        created_at: state.store.created_at(&session.id),
        messages: state.store.messages(&session.id),
    })
}

/// DELETE /api/v1/auth/clear-session
pub async fn clear_session_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionIdent>,
) -> Json<SessionSnapshot> {
    state.store.clear(&session.id);
    info!("Cleared session {}", session.id);
    Json(SessionSnapshot {
        session_id: session.id.clone(),
        created_at: state.store.created_at(&session.id),
        messages: Vec::new(),
    })
}
