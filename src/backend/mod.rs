//! Backend module - model registry, provider adapters and credentials

pub mod adapters;
pub mod credentials;
pub mod http_backend;
pub mod registry;
pub mod traits;

pub use adapters::AdapterSet;
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use http_backend::OpenAiCompatibleAdapter;
pub use registry::{resolve_provider, ModelDescriptor, ModelRegistry, ProviderKind, RegistryError};
pub use traits::{GenerateRequest, GeneratedImage, IterateRequest, ProviderAdapter, ProviderError};
