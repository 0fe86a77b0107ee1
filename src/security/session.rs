use axum::{
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use crate::models::chat::SessionId;

pub const SESSION_COOKIE: &str = "session_id";

/// The caller's session identity for this request. Resolution is pure: the
/// id-to-conversation mapping lives in the conversation store, not here.
#[derive(Debug, Clone)]
pub struct SessionIdent {
    pub id: SessionId,
    pub is_new: bool,
}

/// Session middleware: read the `session_id` cookie, or mint a fresh
/// 128-bit identifier and set the cookie on the way out so the browser
/// keeps the conversation across requests.
pub async fn session_middleware(mut request: Request, next: Next) -> Response {
    let ident = match cookie_session_id(&request) {
        Some(id) => SessionIdent { id, is_new: false },
        None => {
            let id = Uuid::new_v4().to_string();
            debug!("Minted new session {}", id);
            SessionIdent { id, is_new: true }
        }
    };

    request.extensions_mut().insert(ident.clone());

    let mut response = next.run(request).await;

    if ident.is_new {
        // Attribute set mirrors the cookie the frontend already expects:
        // readable from JS, cross-site, whole-origin path.
        let cookie = format!("{}={}; Path=/; SameSite=None", SESSION_COOKIE, ident.id);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}

fn cookie_session_id(request: &Request) -> Option<SessionId> {
    let raw = request.headers().get(header::COOKIE)?.to_str().ok()?;
    parse_session_cookie(raw)
}

fn parse_session_cookie(raw: &str) -> Option<SessionId> {
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
