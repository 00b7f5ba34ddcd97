//! Shared document storage for state that outlives a single dispatch
//!
//! Job records, sessions and rate-limit counters are stored as versioned JSON
//! documents. Every mutation goes through [`DocumentStore::compare_and_swap`]
//! so concurrent writers never lose each other's updates.

pub mod memory;
pub mod retry;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use memory::MemoryDocumentStore;
pub use retry::{with_backoff, RetryPolicy};

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backing store could not be reached or timed out
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored document could not be decoded
    #[error("corrupt document at '{key}': {message}")]
    Corrupt { key: String, message: String },

    /// Document could not be encoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Too many concurrent writers on one key
    #[error("write contention on '{0}'")]
    Contention(String),
}

impl StoreError {
    /// Only transport-level failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A stored document with its version
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub body: Value,
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Write applied; the document now has this version
    Swapped { version: u64 },
    /// Another writer got there first
    Conflict { current: Option<u64> },
}

/// Versioned key/value store with atomic conditional update
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Unconditional write, returns the new version
    async fn put(&self, key: &str, body: Value) -> Result<u64, StoreError>;

    /// Write only if the current version equals `expected`.
    ///
    /// `expected = None` creates the document only if it does not exist yet.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<u64>,
        body: Value,
    ) -> Result<CasOutcome, StoreError>;
}

/// Decode a stored document into a typed value
pub fn decode<T: DeserializeOwned>(key: &str, doc: &Versioned) -> Result<T, StoreError> {
    serde_json::from_value(doc.body.clone()).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Encode a typed value for storage
pub fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// What a read-modify-write step decided to do
pub enum Mutation<T, R> {
    /// Write the new document, then hand back `R`
    Write(T, R),
    /// Leave the document alone
    Skip(R),
}

/// Read-modify-write a document under compare-and-swap.
///
/// `mutate` sees the freshly read document on every attempt, so any check it
/// makes is re-validated after a lost race. Transport failures are retried
/// with `retry`; losing more than `max_attempts` races yields
/// [`StoreError::Contention`].
pub async fn update<T, R, E, F>(
    store: &dyn DocumentStore,
    retry: RetryPolicy,
    key: &str,
    max_attempts: u32,
    mut mutate: F,
) -> Result<R, E>
where
    T: Serialize + DeserializeOwned,
    E: From<StoreError>,
    F: FnMut(Option<T>) -> Result<Mutation<T, R>, E>,
{
    for attempt in 0..max_attempts {
        let current = with_backoff(retry, "store.get", StoreError::is_retryable, || store.get(key)).await?;

        let (expected, value) = match current {
            Some(doc) => (Some(doc.version), Some(decode::<T>(key, &doc)?)),
            None => (None, None),
        };

        let (next, result) = match mutate(value)? {
            Mutation::Skip(result) => return Ok(result),
            Mutation::Write(next, result) => (next, result),
        };

        let body = encode(&next)?;
        let outcome = with_backoff(retry, "store.compare_and_swap", StoreError::is_retryable, || {
            store.compare_and_swap(key, expected, body.clone())
        })
        .await?;

        match outcome {
            CasOutcome::Swapped { .. } => return Ok(result),
            CasOutcome::Conflict { current } => {
                debug!(key = %key, attempt = attempt, current = ?current, "Conditional write lost, re-reading");
            }
        }
    }

    Err(StoreError::Contention(key.to_string()).into())
}
