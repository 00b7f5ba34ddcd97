//! In-process image store

use async_trait::async_trait;
use dashmap::DashMap;

use super::{finalize_key, validate_key, ImageError, ImageStore};

#[derive(Default)]
pub struct MemoryImageStore {
    images: DashMap<String, Vec<u8>>,
    url_prefix: String,
}

impl MemoryImageStore {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            images: DashMap::new(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.images.contains_key(key)
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn save(&self, key_hint: &str, data: &[u8]) -> Result<String, ImageError> {
        let key = finalize_key(key_hint, data)?;
        self.images.insert(key.clone(), data.to_vec());
        Ok(key)
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, ImageError> {
        validate_key(key)?;
        self.images
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ImageError::NotFound(key.to_string()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, key)
    }
}
