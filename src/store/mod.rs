//! The record store the engine exports from and imports into.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::EntityType;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection-level failure before the store acknowledged the request.
    /// Safe to retry.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store rejected batch: {0}")]
    Rejected(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// One record in a batch-create request. `correlation` is the record's
/// import key; stores that can echo it let the engine match responses by
/// key rather than by position.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRecord {
    pub correlation: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedRecord {
    pub id: String,
    pub correlation: Option<String>,
}

pub trait Store: Send + Sync {
    /// All live records of one type as documents carrying their `id`.
    fn fetch_all(&self, kind: EntityType) -> Result<Vec<serde_json::Value>, StoreError>;

    /// Create every record and return one assigned record per input.
    fn create_batch(
        &self,
        kind: EntityType,
        records: &[PendingRecord],
    ) -> Result<Vec<AssignedRecord>, StoreError>;

    fn fetch_photo(&self, _person_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    fn save_photo(&self, _person_id: &str, _bytes: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }

    /// Record that an archive with this fingerprint is being imported.
    /// Returns false when the store has seen the fingerprint before.
    fn claim_import(&self, _fingerprint: &str) -> Result<bool, StoreError> {
        Ok(true)
    }
}

/// Attach the assigned id to a document, producing what `fetch_all` returns.
pub(crate) fn with_id(body: &serde_json::Value, id: &str) -> serde_json::Value {
    let mut doc = body.clone();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    }
    doc
}
