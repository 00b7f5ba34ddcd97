//! Configuration loading

pub mod settings;

pub use settings::{
    DispatchConfig, IterationConfig, LoggingConfig, ModelConfig, ModerationConfig, PromptConfig,
    RateLimitConfig, ServerConfig, Settings, StorageConfig,
};
