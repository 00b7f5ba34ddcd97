//! File storage for generated images

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use super::{finalize_key, validate_key, ImageError, ImageStore};
use crate::config::StorageConfig;

/// Images under a local directory, keys map to relative paths
pub struct FileImageStore {
    storage_path: PathBuf,
    url_prefix: String,
}

impl FileImageStore {
    pub fn new(storage_path: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.base_path, &config.url_prefix)
    }

    /// Get the full path for a key
    pub fn get_path(&self, key: &str) -> PathBuf {
        self.storage_path.join(key)
    }
}

#[async_trait]
impl ImageStore for FileImageStore {
    async fn save(&self, key_hint: &str, data: &[u8]) -> Result<String, ImageError> {
        let key = finalize_key(key_hint, data)?;
        let file_path = self.get_path(&key);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&file_path, data).await?;

        debug!(path = ?file_path, size = data.len(), "Saved image file");
        Ok(key)
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, ImageError> {
        validate_key(key)?;
        match fs::read(self.get_path(key)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ImageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, key)
    }
}
