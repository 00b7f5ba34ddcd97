//! In-process document store

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;

use super::{CasOutcome, DocumentStore, StoreError, Versioned};

/// `DashMap`-backed store. CAS is atomic per key through the entry API.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Versioned>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Keys with the given prefix
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.documents
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.documents.get(key).map(|doc| doc.clone()))
    }

    async fn put(&self, key: &str, body: Value) -> Result<u64, StoreError> {
        let mut entry = self
            .documents
            .entry(key.to_string())
            .or_insert_with(|| Versioned {
                version: 0,
                body: Value::Null,
            });
        entry.version += 1;
        entry.body = body;
        Ok(entry.version)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        body: Value,
    ) -> Result<CasOutcome, StoreError> {
        match self.documents.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if expected != Some(current) {
                    return Ok(CasOutcome::Conflict {
                        current: Some(current),
                    });
                }
                let version = current + 1;
                occupied.insert(Versioned { version, body });
                Ok(CasOutcome::Swapped { version })
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(CasOutcome::Conflict { current: None });
                }
                vacant.insert(Versioned { version: 1, body });
                Ok(CasOutcome::Swapped { version: 1 })
            }
        }
    }
}
