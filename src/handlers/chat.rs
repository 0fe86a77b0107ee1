use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;
use tracing::{info, warn};

use crate::models::chat::{ChatMessage, ChatRequest, ChatResponse, Role};
use crate::security::SessionIdent;
use crate::services::conversation::StreamCommit;
use crate::services::credentials::Credentials;
use crate::services::retrieval::retrieve_context;
use crate::state::AppState;
use crate::utils::error::ApiError;

/// POST /api/v1/chat/
///
/// One logical turn: resolve credentials, optionally retrieve context,
/// append the user turn, assemble the windowed prompt, and forward it
/// upstream, buffered or streamed depending on the request flag.
pub async fn chat_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionIdent>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let credentials = Credentials::resolve(&headers, request.model.as_deref(), &state.settings)?;
    let session_id = session.id.clone();

    info!(
        "Chat request: session={}, stream={}, message_len={}",
        session_id,
        request.stream,
        request.message.len()
    );

    // Serialize the whole logical turn per session: concurrent requests
    // against the same session run back to back, so each stored user turn
    // is directly followed by its assistant turn.
    let turn = state.store.turn_lock(&session_id).await;

    let context = if state.settings.rag.enabled {
        retrieve_context(
            state.retrieval.as_ref(),
            &request.message,
            &state.settings.rag,
        )
        .await
        .map_err(|e| ApiError::Transport(format!("Retrieval collaborator failed: {}", e)))?
    } else {
        None
    };

    // The context-augmented text is what gets persisted by default, so the
    // context stays re-derivable from history alone.
    let stored_text = match (&context, state.settings.prompts.persist_augmented) {
        (Some(block), true) => state.assembler.augment(block, &request.message),
        _ => request.message.clone(),
    };
    state.store.append_user(&session_id, stored_text);

    let mut window = state
        .store
        .windowed(&session_id, state.settings.llm.history_window);
    if let (Some(block), false) = (&context, state.settings.prompts.persist_augmented) {
        // Raw text was stored; augment only the outgoing copy.
        if let Some(last_user) = window.iter_mut().rev().find(|m| m.role == Role::User) {
            last_user.content = state.assembler.augment(block, &request.message);
        }
    }

    let messages = state
        .assembler
        .assemble(&window, &request.message, context.is_some());

    if request.stream {
        stream_chat(state, session_id, turn, messages, credentials).await
    } else {
        buffered_chat(state, session_id, turn, messages, credentials).await
    }
}

async fn buffered_chat(
    state: AppState,
    session_id: String,
    _turn: tokio::sync::OwnedMutexGuard<()>,
    messages: Vec<ChatMessage>,
    credentials: Credentials,
) -> Result<Response, ApiError> {
    let mut commit = StreamCommit::new(state.store.clone(), session_id);
    let reply = state.llm.complete(&messages, &credentials).await?;
    commit.push(&reply.content);
    commit.commit();

    Ok(Json(ChatResponse { response: reply }).into_response())
}

async fn stream_chat(
    state: AppState,
    session_id: String,
    turn: tokio::sync::OwnedMutexGuard<()>,
    messages: Vec<ChatMessage>,
    credentials: Credentials,
) -> Result<Response, ApiError> {
    let commit = StreamCommit::new(state.store.clone(), session_id.clone());
    let deltas = state
        .llm
        .complete_stream(&messages, &credentials, commit)
        .await?;

    // The turn guard moves into the stream so the session stays locked
    // until the assistant turn is committed (or the caller disconnects and
    // the commit guard persists the partial reply).
    let stream = async_stream::stream! {
        let _turn = turn;
        let mut deltas = deltas;
        while let Some(item) = deltas.next().await {
            match item {
                Ok(fragment) => {
                    yield Ok::<Event, Infallible>(Event::default().data(fragment));
                }
                Err(e) => {
                    warn!("Stream failed mid-response for session {}: {}", session_id, e);
                    yield Ok(Event::default().event("error").data(e.to_string()));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}
