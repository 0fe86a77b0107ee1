use futures::stream::Stream;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::models::chat::{ChatMessage, CompletionMessage, Role, TokenUsage};
use crate::services::conversation::StreamCommit;
use crate::services::credentials::Credentials;
use crate::utils::error::ApiError;

/// Probe sent by the test-connection endpoint.
pub const TEST_CONNECTION_PROBE: &str =
    "Test Connection, if success, return the words Connected only";

const DONE_SENTINEL: &str = "[DONE]";

/// Lazy sequence of streamed content fragments. Finite, not restartable,
/// consumable exactly once.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<&'a [String]>,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

// Streaming frame payloads
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
struct ChoiceChunk {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// One parsed server-sent-event line.
#[derive(Debug, PartialEq)]
enum StreamFrame {
    /// Non-empty content fragment.
    Delta(String),
    /// `[DONE]` sentinel; terminates the sequence.
    Done,
    /// Comment, empty delta, or unparseable frame. Never fatal.
    Skip,
}

/// Client for OpenAI-compatible `/v1/chat/completions` endpoints
/// (Groq, OpenRouter, and friends).
///
/// The underlying reqwest client carries only a connect timeout: the
/// configured request deadline applies to buffered calls, while streaming
/// calls are not deadline-bound once the first byte arrives.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
    referer: String,
}

impl LlmService {
    pub fn new(config: LlmConfig, referer: String) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            config,
            referer,
        }
    }

    fn request_payload<'a>(&'a self, messages: &'a [ChatMessage], model: &'a str, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            model,
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stop: self.config.stop.as_deref(),
            stream,
        }
    }

    /// Buffered chat completion. One POST, one full JSON body back.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        credentials: &Credentials,
    ) -> Result<CompletionMessage, ApiError> {
        debug!(
            "Chat completion: {} messages, model {}",
            messages.len(),
            credentials.model
        );

        let payload = self.request_payload(messages, &credentials.model, false);
        let response = self
            .client
            .post(credentials.completions_url())
            .bearer_auth(&credentials.api_key)
            .header("HTTP-Referer", &self.referer)
            .json(&payload)
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to read upstream body: {}", e)))?;

        let value: serde_json::Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) if !status.is_success() => return Err(classify_status(status, &body)),
            Err(e) => {
                return Err(ApiError::MalformedResponse(format!(
                    "Upstream body is not valid JSON: {}",
                    e
                )))
            }
        };

        // Providers report failures both via HTTP status and via an `error`
        // object in an otherwise-200 body; the body form carries more detail.
        if let Some(error) = value.get("error") {
            return Err(classify_error_body(error, status));
        }
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let completion: CompletionResponse = serde_json::from_value(value).map_err(|e| {
            ApiError::MalformedResponse(format!("Unexpected completion shape: {}", e))
        })?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::MalformedResponse("No choices in upstream response".into()))?;

        if let Some(usage) = &completion.usage {
            debug!(
                "Token usage: prompt={} completion={} total={}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }

        Ok(CompletionMessage {
            role: Role::Assistant,
            content: choice.message.content,
            usage: completion.usage,
        })
    }

    /// Streaming chat completion. Yields content fragments as they arrive
    /// and feeds every fragment into `commit`, which appends the full
    /// accumulated text as one assistant turn when the stream ends, or on
    /// drop, so a caller disconnect still persists the partial reply.
    pub async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        credentials: &Credentials,
        mut commit: StreamCommit,
    ) -> Result<DeltaStream, ApiError> {
        debug!(
            "Streaming chat completion: {} messages, model {}",
            messages.len(),
            credentials.model
        );

        let payload = self.request_payload(messages, &credentials.model, true);
        let response = self
            .client
            .post(credentials.completions_url())
            .bearer_auth(&credentials.api_key)
            .header("HTTP-Referer", &self.referer)
            .header(header::ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Some(error) = value.get("error") {
                    return Err(classify_error_body(error, status));
                }
            }
            return Err(classify_status(status, &body));
        }

        let mut bytes_stream = response.bytes_stream();

        // Frames can split across network chunks, so re-assemble lines
        // before parsing. Providers are not guaranteed to deliver [DONE];
        // stream end and sentinel both terminate, and the commit guard
        // persists whatever accumulated either way.
        let stream = async_stream::stream! {
            let mut line_buf = String::new();
            'read: while let Some(chunk) = bytes_stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Upstream stream read failed: {}", e);
                        yield Err(ApiError::Transport(format!(
                            "Upstream stream read failed: {}",
                            e
                        )));
                        break 'read;
                    }
                };
                line_buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = line_buf.find('\n') {
                    let line: String = line_buf.drain(..=pos).collect();
                    match parse_frame(line.trim_end()) {
                        StreamFrame::Delta(content) => {
                            commit.push(&content);
                            yield Ok(content);
                        }
                        StreamFrame::Done => break 'read,
                        StreamFrame::Skip => {}
                    }
                }
            }
            commit.commit();
        };

        Ok(Box::pin(stream))
    }

    /// Minimal upstream round-trip used to validate credentials.
    pub async fn test_connection(&self, credentials: &Credentials) -> Result<String, ApiError> {
        let messages = vec![ChatMessage::user(TEST_CONNECTION_PROBE)];
        let reply = self.complete(&messages, credentials).await?;
        Ok(reply.content)
    }
}

/// Decode one SSE line. Unparseable frames are skipped, never fatal.
fn parse_frame(line: &str) -> StreamFrame {
    let Some(payload) = line.strip_prefix("data:") else {
        return StreamFrame::Skip;
    };
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return StreamFrame::Done;
    }
    if payload.is_empty() {
        return StreamFrame::Skip;
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .first()
            .and_then(|c| c.delta.content.clone())
            .filter(|content| !content.is_empty())
            .map(StreamFrame::Delta)
            .unwrap_or(StreamFrame::Skip),
        Err(e) => {
            debug!("Skipping unparseable stream frame: {}", e);
            StreamFrame::Skip
        }
    }
}

fn map_send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(format!("Upstream request timed out: {}", e))
    } else {
        ApiError::Transport(format!("Failed to call LLM API: {}", e))
    }
}

/// Classify a provider `error` object per its embedded code.
fn classify_error_body(error: &serde_json::Value, status: StatusCode) -> ApiError {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error")
        .to_string();
    let code = error
        .get("code")
        .and_then(|c| c.as_u64())
        .map(|c| c as u16)
        .or_else(|| (!status.is_success()).then(|| status.as_u16()));
    let metadata = error.get("metadata").cloned().unwrap_or(serde_json::Value::Null);

    classify(code, message, metadata)
}

/// Classify a bare non-2xx HTTP status with no parseable error body.
fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let excerpt: String = body.chars().take(200).collect();
    classify(
        Some(status.as_u16()),
        format!("Upstream returned {}: {}", status, excerpt),
        serde_json::Value::Null,
    )
}

fn classify(code: Option<u16>, message: String, metadata: serde_json::Value) -> ApiError {
    match code {
        Some(401) | Some(403) => ApiError::Authentication(message),
        Some(503) => {
            let raw = metadata
                .get("raw")
                .and_then(|r| r.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| message.clone());
            ApiError::upstream(format!("Model unavailable: {}", raw), Some(503), metadata)
        }
        Some(504) => ApiError::Timeout(message),
        _ => ApiError::upstream(message, code, metadata),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::ConversationStore;
    use serde_json::json;

    #[test]
    fn test_parse_frame_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_frame(line), StreamFrame::Delta("Hel".to_string()));
    }

    #[test]
    fn test_parse_frame_done_sentinel() {
        assert_eq!(parse_frame("data: [DONE]"), StreamFrame::Done);
        assert_eq!(parse_frame("data:[DONE]"), StreamFrame::Done);
    }

    #[test]
    fn test_parse_frame_skips_malformed_and_empty() {
        assert_eq!(parse_frame("data: {not json"), StreamFrame::Skip);
        assert_eq!(parse_frame("data:"), StreamFrame::Skip);
        assert_eq!(parse_frame(": keep-alive comment"), StreamFrame::Skip);
        assert_eq!(parse_frame(""), StreamFrame::Skip);
        let empty_delta = r#"data: {"choices":[{"delta":{}}]}"#;
        assert_eq!(parse_frame(empty_delta), StreamFrame::Skip);
    }

    #[test]
    fn test_frames_accumulate_until_sentinel() {
        let input = vec![
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            "data: broken{",
            "data: [DONE]",
            r#"data: {"choices":[{"delta":{"content":"never"}}]}"#,
        ];

        let store = ConversationStore::new();
        let mut commit = StreamCommit::new(store.clone(), "s".to_string());
        let mut yielded = Vec::new();
        for line in input {
            match parse_frame(line) {
                StreamFrame::Delta(content) => {
                    commit.push(&content);
                    yielded.push(content);
                }
                StreamFrame::Done => break,
                StreamFrame::Skip => {}
            }
        }
        commit.commit();

        assert_eq!(yielded.join(""), "Hello");
        let messages = store.messages("s");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hello");
    }

    #[test]
    fn test_classify_credential_codes() {
        assert!(matches!(
            classify(Some(401), "bad key".into(), json!(null)),
            ApiError::Authentication(_)
        ));
        assert!(matches!(
            classify(Some(403), "forbidden".into(), json!(null)),
            ApiError::Authentication(_)
        ));
    }

    #[test]
    fn test_classify_unavailable_carries_raw_detail() {
        let err = classify(
            Some(503),
            "overloaded".into(),
            json!({"raw": "model llama is cold-starting"}),
        );
        match err {
            ApiError::Upstream { detail, code, .. } => {
                assert_eq!(detail, "Model unavailable: model llama is cold-starting");
                assert_eq!(code, Some(503));
            }
            other => panic!("expected Upstream, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_timeout_and_generic() {
        assert!(matches!(
            classify(Some(504), "deadline".into(), json!(null)),
            ApiError::Timeout(_)
        ));
        match classify(Some(429), "rate limited".into(), json!(null)) {
            ApiError::Upstream { code, .. } => assert_eq!(code, Some(429)),
            other => panic!("expected Upstream, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_body_falls_back_to_status_code() {
        let error = json!({"message": "nope"});
        let err = classify_error_body(&error, StatusCode::UNAUTHORIZED);
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[test]
    fn test_request_payload_shape() {
        let service = LlmService::new(LlmConfig::default(), "http://localhost".into());
        let messages = vec![ChatMessage::user("hi")];
        let payload = service.request_payload(&messages, "m1", true);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["model"], "m1");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value.get("stop").is_none());
    }
}
