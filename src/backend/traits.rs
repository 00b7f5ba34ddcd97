//! Common traits and types for provider adapters

use async_trait::async_trait;
use regex::Regex;
use secrecy::SecretString;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Normalized generation request handed to an adapter
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Vendor-side model identifier
    pub target_id: String,

    pub prompt: String,

    /// Number of inference steps
    pub steps: Option<u32>,

    /// Guidance scale / CFG scale
    pub guidance: Option<f32>,

    /// Control strength, for adapters that support it
    pub control: Option<f32>,

    /// Base URL override for compatible endpoints
    pub endpoint: Option<String>,

    pub credential: Option<SecretString>,
}

/// Follow-up request against an earlier image
#[derive(Debug, Clone)]
pub struct IterateRequest {
    pub generate: GenerateRequest,

    /// Image being refined, raw bytes
    pub source_image: Option<Vec<u8>>,

    /// Earlier prompts of the column, oldest first
    pub context: Vec<String>,
}

impl IterateRequest {
    /// Fold recent context into a single text prompt
    pub fn contextual_prompt(&self) -> String {
        let recent: Vec<&str> = self
            .context
            .iter()
            .rev()
            .take(2)
            .rev()
            .map(String::as_str)
            .collect();

        if recent.is_empty() {
            self.generate.prompt.clone()
        } else {
            format!("Previous: {}. Now: {}", recent.join(" | "), self.generate.prompt)
        }
    }
}

/// Normalized result of a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Base64 encoded image data
    pub b64_json: String,

    /// Revised prompt if the model modified it
    pub revised_prompt: Option<String>,
}

/// Typed adapter failure. Each one becomes a slot error, never an HTTP error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned {status}: {message}")]
    Vendor { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider unreachable: {0}")]
    Connection(String),

    #[error("no credential available for '{0}'")]
    MissingCredential(String),

    #[error("no adapter registered for provider '{0}'")]
    Unsupported(String),

    #[error("adapter task panicked: {0}")]
    Panicked(String),
}

impl ProviderError {
    /// Short machine-readable code stored on the slot
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "PROVIDER_TIMEOUT",
            ProviderError::Vendor { .. } => "PROVIDER_ERROR",
            ProviderError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            ProviderError::Connection(_) => "PROVIDER_UNREACHABLE",
            ProviderError::MissingCredential(_) => "MISSING_CREDENTIAL",
            ProviderError::Unsupported(_) => "PROVIDER_UNSUPPORTED",
            ProviderError::Panicked(_) => "PROVIDER_PANICKED",
        }
    }

    /// Display text with secrets scrubbed
    pub fn sanitized_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Connection(format!("request timed out: {}", e))
        } else if e.is_connect() {
            ProviderError::Connection(e.to_string())
        } else if e.is_decode() {
            ProviderError::MalformedResponse(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::Vendor {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ProviderError::Connection(e.to_string())
        }
    }
}

static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Bearer\s+[A-Za-z0-9\-_\.]+").unwrap());
static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|apikey|key|token|secret|password|authorization)["']?\s*[:=]\s*["']?[A-Za-z0-9\-_\.]+["']?"#)
        .unwrap()
});
static SECRET_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"sk-[A-Za-z0-9\-_]{20,}").unwrap());
static LONG_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9]{32,}").unwrap());

/// Remove bearer tokens, `key=...` pairs, `sk-...` keys and long opaque tokens
pub fn sanitize_error_message(message: &str) -> String {
    let s = BEARER_RE.replace_all(message, "Bearer [REDACTED]");
    let s = KEY_VALUE_RE.replace_all(&s, "$1=[REDACTED]");
    let s = SECRET_KEY_RE.replace_all(&s, "[REDACTED_KEY]");
    let s = LONG_TOKEN_RE.replace_all(&s, "[REDACTED]");
    s.into_owned()
}

/// One vendor API, translated to the normalized request/result contract
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Adapter name for logs
    fn name(&self) -> &str;

    /// Generate one image from a text prompt
    async fn generate(&self, request: GenerateRequest) -> Result<GeneratedImage, ProviderError>;

    /// Refine an earlier image.
    ///
    /// The default folds the context into a text-only generate call.
    async fn iterate(&self, request: IterateRequest) -> Result<GeneratedImage, ProviderError> {
        let prompt = request.contextual_prompt();
        let mut generate = request.generate;
        generate.prompt = prompt;
        self.generate(generate).await
    }
}
