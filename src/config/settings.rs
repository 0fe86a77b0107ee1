use anyhow::Result;
use config::{Config, Environment, File};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Process-wide configuration. Loaded once in `main` and passed down
/// explicitly; nothing in the crate reads configuration from globals.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Advertised origin, sent upstream as `HTTP-Referer`.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    /// Process-default credentials. Per-request `API_KEY`/`API_URL` headers
    /// take precedence; empty after fallback is a configuration error.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    /// How many trailing history messages go upstream per request.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Known-good provider model identifiers. Only consulted when
    /// `enforce_model_allowlist` is on; otherwise any model passes through.
    #[serde(default = "default_allowed_models")]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub enforce_model_allowlist: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Snippets scoring below this are dropped from the context block.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// When true (historical behavior) the context-augmented user text is
    /// what gets persisted; when false the raw input is stored and only the
    /// outgoing copy is augmented.
    #[serde(default = "default_true")]
    pub persist_augmented: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_public_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-specdec".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.9
}

fn default_history_window() -> usize {
    7
}

static DEFAULT_ALLOWED_MODELS: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        "llama-3.3-70b-specdec".to_string(),                  // Groq
        "meta-llama/llama-3.1-70b-instruct:free".to_string(), // OpenRouter
    ]
});

fn default_allowed_models() -> Vec<String> {
    DEFAULT_ALLOWED_MODELS.clone()
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant specialized in financial services in Indonesia.

Role limits:
- Assist users in tracking their expenses and income.
- Provide insights on Indonesian financial markets, including stocks, cryptocurrencies, and bonds (Obligasi).
- Suggest ways to improve financial habits and manage investments effectively.
- Answer questions about budgeting, savings, taxes, and money management specific to Indonesia.

Only respond to personal finance or financial services topics. If asked about
anything else, politely redirect the discussion to finance.

Question: {user_message}

Answer: keep it short and concise. If you are unsure, say "I'm not sure" and
stop there; if you don't know, say "I don't know" and stop there."#;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: String::new(),
            model: default_model(),
            timeout_seconds: default_timeout_seconds(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop: None,
            history_window: default_history_window(),
            allowed_models: default_allowed_models(),
            enforce_model_allowlist: false,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            persist_augmented: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
