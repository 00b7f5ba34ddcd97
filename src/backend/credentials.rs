//! Credential lookup for provider calls

use secrecy::SecretString;
use std::collections::HashMap;

/// Resolves a model's `credential_ref` to a secret
pub trait CredentialSource: Send + Sync {
    fn resolve(&self, credential_ref: &str) -> Option<SecretString>;
}

/// Reads the environment variable named by the reference
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn resolve(&self, credential_ref: &str) -> Option<SecretString> {
        std::env::var(credential_ref)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(SecretString::from)
    }
}

/// Fixed reference-to-secret map
#[derive(Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, SecretString>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential_ref: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets
            .insert(credential_ref.into(), SecretString::from(secret.into()));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn resolve(&self, credential_ref: &str) -> Option<SecretString> {
        self.secrets.get(credential_ref).cloned()
    }
}
