//! OpenAI-images-compatible HTTP adapter

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{GenerateRequest, GeneratedImage, ProviderAdapter, ProviderError};

pub const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Longest vendor error body kept on a slot
const MAX_ERROR_BODY: usize = 500;

/// Adapter for every provider speaking `POST /images/generations`
pub struct OpenAiCompatibleAdapter {
    name: String,
    client: Client,
    default_base_url: String,
}

#[derive(Debug, Serialize)]
struct ApiGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_inference_steps: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    data: Vec<ApiImageData>,
}

#[derive(Debug, Deserialize)]
struct ApiImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_OPENAI_API_URL, timeout)
    }

    /// Adapter whose requests go to `base_url` unless the model overrides it
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: "openai-compatible".to_string(),
            client,
            default_base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn download(&self, url: &str) -> Result<String, ProviderError> {
        debug!(adapter = %self.name, "Downloading image from provider URL");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Vendor {
                status: status.as_u16(),
                message: "image download failed".to_string(),
            });
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::MalformedResponse("downloaded image is empty".to_string()));
        }
        Ok(STANDARD.encode(&bytes))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GeneratedImage, ProviderError> {
        let credential = request
            .credential
            .as_ref()
            .ok_or_else(|| ProviderError::MissingCredential(request.target_id.clone()))?;

        let base_url = request
            .endpoint
            .as_deref()
            .map(|e| e.trim_end_matches('/'))
            .unwrap_or(&self.default_base_url);
        let url = format!("{}/images/generations", base_url);

        debug!(
            adapter = %self.name,
            target = %request.target_id,
            prompt_len = request.prompt.len(),
            "Sending generate request"
        );

        let body = ApiGenerateRequest {
            model: &request.target_id,
            prompt: &request.prompt,
            n: 1,
            size: "1024x1024",
            response_format: "b64_json",
            guidance_scale: request.guidance,
            num_inference_steps: request.steps,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let message: String = text.chars().take(MAX_ERROR_BODY).collect();
            warn!(
                adapter = %self.name,
                target = %request.target_id,
                status = status.as_u16(),
                "Provider returned an error"
            );
            return Err(ProviderError::Vendor {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: ApiGenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let image = api_response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("provider returned empty data array".to_string()))?;

        let b64_json = match (image.b64_json, image.url) {
            (Some(b64), _) if !b64.is_empty() => b64,
            (_, Some(url)) => self.download(&url).await?,
            _ => {
                return Err(ProviderError::MalformedResponse(
                    "image entry has neither b64_json nor url".to_string(),
                ))
            }
        };

        Ok(GeneratedImage {
            b64_json,
            revised_prompt: image.revised_prompt,
        })
    }
}
