//! Model registry: the enabled image models, built once at startup

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;

/// Known provider kinds plus a generic OpenAI-images-compatible fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    GoogleGemini,
    GoogleImagen,
    BedrockNova,
    BedrockStableDiffusion,
    Stability,
    BlackForestLabs,
    Recraft,
    Hunyuan,
    Qwen,
    Compatible,
}

/// Wire protocol an adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// `POST /images/generations` with bearer auth
    OpenAiImages,
    /// Vendor-specific API, needs a dedicated adapter
    Vendor,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::GoogleGemini => "google_gemini",
            ProviderKind::GoogleImagen => "google_imagen",
            ProviderKind::BedrockNova => "bedrock_nova",
            ProviderKind::BedrockStableDiffusion => "bedrock_sd",
            ProviderKind::Stability => "stability",
            ProviderKind::BlackForestLabs => "bfl",
            ProviderKind::Recraft => "recraft",
            ProviderKind::Hunyuan => "hunyuan",
            ProviderKind::Qwen => "qwen",
            ProviderKind::Compatible => "compatible",
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            ProviderKind::OpenAi | ProviderKind::Compatible | ProviderKind::Qwen | ProviderKind::Hunyuan => {
                Protocol::OpenAiImages
            }
            _ => Protocol::Vendor,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            "google_gemini" | "gemini" => ProviderKind::GoogleGemini,
            "google_imagen" | "imagen" => ProviderKind::GoogleImagen,
            "bedrock_nova" | "nova" => ProviderKind::BedrockNova,
            "bedrock_sd" => ProviderKind::BedrockStableDiffusion,
            "stability" => ProviderKind::Stability,
            "bfl" | "flux" => ProviderKind::BlackForestLabs,
            "recraft" => ProviderKind::Recraft,
            "hunyuan" => ProviderKind::Hunyuan,
            "qwen" => ProviderKind::Qwen,
            "compatible" | "generic" => ProviderKind::Compatible,
            other => return Err(RegistryError::UnknownProvider(other.to_string())),
        };
        Ok(kind)
    }
}

/// Detect the provider from a display name. First match wins.
pub fn resolve_provider(name: &str) -> ProviderKind {
    let lower = name.to_lowercase();
    let any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if any(&["dalle", "dall-e", "gpt", "chatgpt"]) {
        ProviderKind::OpenAi
    } else if any(&["gemini"]) {
        ProviderKind::GoogleGemini
    } else if any(&["imagen"]) {
        ProviderKind::GoogleImagen
    } else if any(&["nova"]) {
        ProviderKind::BedrockNova
    } else if any(&["stable diffusion", "sd3", "sdxl"]) && any(&["bedrock", "aws", "amazon"]) {
        ProviderKind::BedrockStableDiffusion
    } else if any(&["stability", "stable diffusion", "sd ", "sdxl"]) {
        ProviderKind::Stability
    } else if any(&["flux", "black forest", "bfl"]) {
        ProviderKind::BlackForestLabs
    } else if any(&["recraft"]) {
        ProviderKind::Recraft
    } else if any(&["hunyuan"]) {
        ProviderKind::Hunyuan
    } else if any(&["qwen"]) {
        ProviderKind::Qwen
    } else {
        debug!(model = %name, "No provider keyword matched, using compatible adapter");
        ProviderKind::Compatible
    }
}

/// Registry errors, all raised at startup
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("model entry #{0} has an empty name")]
    EmptyName(usize),

    #[error("model '{0}' has an empty target_id")]
    EmptyTarget(String),

    #[error("model '{0}' is configured more than once")]
    DuplicateName(String),

    #[error("no image models are enabled")]
    NoModels,
}

/// One enabled model, immutable for the process lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub provider: ProviderKind,
    pub target_id: String,
    /// Absent for providers that use ambient credentials
    pub credential_ref: Option<String>,
    pub endpoint: Option<String>,
}

/// Read-only list of enabled models in configuration order
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    /// Build from operator configuration. Any malformed entry fails here.
    pub fn from_config(configs: &[ModelConfig]) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut models = Vec::new();

        for (position, config) in configs.iter().enumerate() {
            let name = config.name.trim();
            if name.is_empty() {
                return Err(RegistryError::EmptyName(position + 1));
            }
            if config.target_id.trim().is_empty() {
                return Err(RegistryError::EmptyTarget(name.to_string()));
            }
            if !seen.insert(name.to_string()) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }

            let provider = match &config.provider {
                Some(explicit) => explicit.parse()?,
                None => resolve_provider(name),
            };

            if !config.enabled {
                debug!(model = %name, "Model disabled, skipping");
                continue;
            }

            if config.credential_ref.is_none() && provider.protocol() == Protocol::OpenAiImages {
                warn!(model = %name, provider = %provider, "Model has no credential_ref");
            }

            info!(model = %name, provider = %provider, target = %config.target_id, "Registered model");
            models.push(ModelDescriptor {
                name: name.to_string(),
                provider,
                target_id: config.target_id.trim().to_string(),
                credential_ref: config.credential_ref.clone(),
                endpoint: config.endpoint.clone(),
            });
        }

        Self::from_descriptors(models)
    }

    /// Build from ready-made descriptors
    pub fn from_descriptors(models: Vec<ModelDescriptor>) -> Result<Self, RegistryError> {
        if models.is_empty() {
            return Err(RegistryError::NoModels);
        }
        Ok(Self { models })
    }

    pub fn list_enabled(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
