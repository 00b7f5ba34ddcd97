//! Image persistence - base64 payloads, storage keys and public URLs

pub mod base64;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileImageStore;
pub use memory::MemoryImageStore;

/// Image storage errors
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image data: {0}")]
    InvalidData(String),

    #[error("invalid image key: {0}")]
    InvalidKey(String),

    #[error("image not found: {0}")]
    NotFound(String),

    #[error("image IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable store for binary image payloads
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist `data` under `key_hint` plus a detected extension; returns the final key
    async fn save(&self, key_hint: &str, data: &[u8]) -> Result<String, ImageError>;

    async fn load(&self, key: &str) -> Result<Vec<u8>, ImageError>;

    /// Public URL a client can fetch the image from
    fn public_url(&self, key: &str) -> String;
}

/// Lowercase, dash-separated form of a model display name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "model".to_string()
    } else {
        slug.to_string()
    }
}

/// Key hint for the image of one job slot
pub fn slot_image_key(job_id: &str, model: &str, index: usize) -> String {
    format!("group-images/{}/{}-{}", job_id, slugify(model), index)
}

/// Key hint for the image of one iteration
pub fn iteration_image_key(session_id: &str, model: &str, iteration: u32) -> String {
    format!("group-images/{}/{}-iter{}", session_id, slugify(model), iteration)
}

pub(crate) fn validate_key(key: &str) -> Result<(), ImageError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(ImageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn finalize_key(key_hint: &str, data: &[u8]) -> Result<String, ImageError> {
    validate_key(key_hint)?;
    if data.is_empty() {
        return Err(ImageError::InvalidData("image payload is empty".to_string()));
    }
    let ext = self::base64::detect_image_format(data).unwrap_or("png");
    Ok(format!("{}.{}", key_hint, ext))
}
