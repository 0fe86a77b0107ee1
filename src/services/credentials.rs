use axum::http::HeaderMap;
use tracing::debug;

use crate::config::Settings;
use crate::utils::error::ApiError;

pub const API_KEY_HEADER: &str = "API_KEY";
pub const API_URL_HEADER: &str = "API_URL";
pub const MODEL_HEADER: &str = "LLM_MODEL";

/// Effective upstream credentials for one request. Never stored with a
/// session; resolved fresh per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

impl Credentials {
    /// Resolve `{api_key, api_url, model}` by precedence: explicit override
    /// (request body / query) > per-request header > process default.
    pub fn resolve(
        headers: &HeaderMap,
        model_override: Option<&str>,
        settings: &Settings,
    ) -> Result<Self, ApiError> {
        let api_key = header_value(headers, API_KEY_HEADER)
            .unwrap_or_else(|| settings.llm.api_key.clone());
        let api_url = header_value(headers, API_URL_HEADER)
            .unwrap_or_else(|| settings.llm.api_url.clone());
        let model = model_override
            .map(str::to_string)
            .or_else(|| header_value(headers, MODEL_HEADER))
            .unwrap_or_else(|| settings.llm.model.clone());

        Self::validated(api_key, api_url, model, settings)
    }

    /// Resolve from explicit values with the same fallback and validation,
    /// used by the test-connection endpoint's query parameters.
    pub fn from_overrides(
        api_key: Option<&str>,
        api_url: Option<&str>,
        model: Option<&str>,
        settings: &Settings,
    ) -> Result<Self, ApiError> {
        let api_key = non_empty(api_key).unwrap_or_else(|| settings.llm.api_key.clone());
        let api_url = non_empty(api_url).unwrap_or_else(|| settings.llm.api_url.clone());
        let model = non_empty(model).unwrap_or_else(|| settings.llm.model.clone());

        Self::validated(api_key, api_url, model, settings)
    }

    fn validated(
        api_key: String,
        api_url: String,
        model: String,
        settings: &Settings,
    ) -> Result<Self, ApiError> {
        if api_key.is_empty() {
            return Err(ApiError::Configuration(
                "LLM API key not configured".to_string(),
            ));
        }
        if api_url.is_empty() {
            return Err(ApiError::Configuration(
                "LLM API base URL not configured".to_string(),
            ));
        }

        if settings.llm.enforce_model_allowlist
            && !settings.llm.allowed_models.is_empty()
            && !settings.llm.allowed_models.iter().any(|m| m == &model)
        {
            return Err(ApiError::Configuration(format!(
                "Invalid model '{}'. Available models: {}",
                model,
                settings.llm.allowed_models.join(", ")
            )));
        }

        debug!("Resolved credentials for model {}", model);
        Ok(Self {
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_url)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
