//! Adapter lookup by provider kind

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::backend::registry::{ProviderKind, Protocol};
use crate::backend::traits::ProviderAdapter;

/// Adapters available to the dispatcher
pub struct AdapterSet {
    compatible: Arc<dyn ProviderAdapter>,
    vendors: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterSet {
    /// `compatible` serves every kind that speaks the OpenAI images protocol
    pub fn new(compatible: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            compatible,
            vendors: HashMap::new(),
        }
    }

    /// Register a dedicated adapter for one provider kind
    pub fn register(mut self, kind: ProviderKind, adapter: Arc<dyn ProviderAdapter>) -> Self {
        info!(provider = %kind, adapter = %adapter.name(), "Registered provider adapter");
        self.vendors.insert(kind, adapter);
        self
    }

    /// Adapter for a kind, if one exists.
    ///
    /// A dedicated registration wins over the protocol default.
    pub fn adapter_for(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self.vendors.get(&kind) {
            return Some(adapter.clone());
        }
        match kind.protocol() {
            Protocol::OpenAiImages => Some(self.compatible.clone()),
            Protocol::Vendor => None,
        }
    }
}
