//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub iteration: IterationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// In-process request flood guard
    #[serde(default = "default_burst_rps")]
    pub burst_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_burst_rps() -> u32 {
    50
}

fn default_burst() -> u32 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            burst_per_second: default_burst_rps(),
            burst_size: default_burst(),
        }
    }
}

/// Prompt validation limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_max_length")]
    pub max_length: usize,
}

fn default_prompt_max_length() -> usize {
    1000
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_length: default_prompt_max_length(),
        }
    }
}

/// Quota configuration: a global hourly ceiling and a per-caller daily ceiling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_global_per_hour")]
    pub global_per_hour: u32,
    #[serde(default = "default_per_caller_per_day")]
    pub per_caller_per_day: u32,
    /// Caller identities that are never counted
    #[serde(default)]
    pub bypass: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_global_per_hour() -> u32 {
    1000
}

fn default_per_caller_per_day() -> u32 {
    50
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_per_hour: default_global_per_hour(),
            per_caller_per_day: default_per_caller_per_day(),
            bypass: vec![],
        }
    }
}

/// Fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    /// Cap on outbound provider calls across all jobs
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calls: usize,
    /// Retries of a slot outcome write that hit a storage outage
    #[serde(default = "default_outcome_retry_attempts")]
    pub outcome_retry_attempts: u32,
    #[serde(default = "default_outcome_retry_base_ms")]
    pub outcome_retry_base_delay_ms: u64,
    #[serde(default = "default_outcome_retry_max_ms")]
    pub outcome_retry_max_delay_ms: u64,
}

fn default_provider_timeout() -> u64 {
    120
}

fn default_max_concurrent() -> usize {
    10
}

fn default_outcome_retry_attempts() -> u32 {
    10
}

fn default_outcome_retry_base_ms() -> u64 {
    1000
}

fn default_outcome_retry_max_ms() -> u64 {
    30_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout(),
            max_concurrent_calls: default_max_concurrent(),
            outcome_retry_attempts: default_outcome_retry_attempts(),
            outcome_retry_base_delay_ms: default_outcome_retry_base_ms(),
            outcome_retry_max_delay_ms: default_outcome_retry_max_ms(),
        }
    }
}

/// Follow-up generation limits, per model column
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_per_model: u32,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_max_iterations() -> u32 {
    7
}

fn default_warning_threshold() -> u32 {
    5
}

fn default_context_window() -> usize {
    3
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_per_model: default_max_iterations(),
            warning_threshold: default_warning_threshold(),
            context_window: default_context_window(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// "file" or "memory"
    #[serde(default = "default_image_backend")]
    pub image_backend: String,
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    /// Conditional-write attempts before a write is reported as contended
    #[serde(default = "default_cas_attempts")]
    pub cas_max_attempts: u32,
}

fn default_image_backend() -> String {
    "file".to_string()
}

fn default_storage_path() -> String {
    "./generated_images".to_string()
}

fn default_url_prefix() -> String {
    "http://localhost:8080/images".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    250
}

fn default_retry_max_delay() -> u64 {
    4000
}

fn default_cas_attempts() -> u32 {
    64
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_backend: default_image_backend(),
            base_path: default_storage_path(),
            url_prefix: default_url_prefix(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            cas_max_attempts: default_cas_attempts(),
        }
    }
}

/// Content classifier configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModerationConfig {
    /// Terms blocked in addition to the built-in list
    #[serde(default)]
    pub extra_terms: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One image model as supplied by the operator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Display name, also used for provider detection
    pub name: String,
    /// Vendor-side model identifier
    pub target_id: String,
    /// Explicit provider kind; detected from `name` when absent
    #[serde(default)]
    pub provider: Option<String>,
    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub credential_ref: Option<String>,
    /// Base URL override for compatible endpoints
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var("FANOUT_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("rate_limit.enabled", true)?
            .set_default("rate_limit.global_per_hour", 1000)?
            .set_default("rate_limit.per_caller_per_day", 50)?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with FANOUT_)
            .add_source(
                Environment::with_prefix("FANOUT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rate_limit.bypass")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.prompt.max_length == 0 {
            return Err(invalid("prompt.max_length must be greater than 0"));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.global_per_hour == 0 || self.rate_limit.per_caller_per_day == 0)
        {
            return Err(invalid("rate limit ceilings must be greater than 0"));
        }
        if self.dispatch.provider_timeout_secs == 0 {
            return Err(invalid("dispatch.provider_timeout_secs must be greater than 0"));
        }
        if self.dispatch.max_concurrent_calls == 0 {
            return Err(invalid("dispatch.max_concurrent_calls must be greater than 0"));
        }
        if self.iteration.max_per_model == 0
            || self.iteration.warning_threshold > self.iteration.max_per_model
        {
            return Err(invalid(
                "iteration.warning_threshold must not exceed iteration.max_per_model (> 0)",
            ));
        }
        if !["file", "memory"].contains(&self.storage.image_backend.as_str()) {
            return Err(invalid(&format!(
                "storage.image_backend '{}' must be 'file' or 'memory'",
                self.storage.image_backend
            )));
        }
        if self.storage.cas_max_attempts == 0 {
            return Err(invalid("storage.cas_max_attempts must be greater than 0"));
        }

        // Model entries are checked in depth when the registry is built
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(invalid("Model name cannot be empty"));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            prompt: PromptConfig::default(),
            rate_limit: RateLimitConfig::default(),
            dispatch: DispatchConfig::default(),
            iteration: IterationConfig::default(),
            storage: StorageConfig::default(),
            moderation: ModerationConfig::default(),
            logging: LoggingConfig::default(),
            models: vec![],
        }
    }
}
