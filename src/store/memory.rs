use super::{with_id, AssignedRecord, PendingRecord, Store, StoreError};
use crate::model::EntityType;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    records: HashMap<EntityType, Vec<serde_json::Value>>,
    photos: HashMap<String, Vec<u8>>,
    claimed: HashSet<String>,
    batches: Vec<(EntityType, usize)>,
}

/// Store kept entirely in memory. Echoes correlation keys and assigns uuid ids.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a live record with a known id.
    pub fn seed(&self, kind: EntityType, id: &str, body: serde_json::Value) {
        let doc = with_id(&body, id);
        self.lock().records.entry(kind).or_default().push(doc);
    }

    pub fn seed_photo(&self, person_id: &str, bytes: &[u8]) {
        self.lock()
            .photos
            .insert(person_id.to_string(), bytes.to_vec());
    }

    pub fn records(&self, kind: EntityType) -> Vec<serde_json::Value> {
        self.lock().records.get(&kind).cloned().unwrap_or_default()
    }

    pub fn count(&self, kind: EntityType) -> usize {
        self.lock().records.get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub fn photo(&self, person_id: &str) -> Option<Vec<u8>> {
        self.lock().photos.get(person_id).cloned()
    }

    /// Batch-create calls received so far, as (type, record count).
    pub fn batches(&self) -> Vec<(EntityType, usize)> {
        self.lock().batches.clone()
    }
}

impl Store for MemoryStore {
    fn fetch_all(&self, kind: EntityType) -> Result<Vec<serde_json::Value>, StoreError> {
        Ok(self.records(kind))
    }

    fn create_batch(
        &self,
        kind: EntityType,
        records: &[PendingRecord],
    ) -> Result<Vec<AssignedRecord>, StoreError> {
        let mut inner = self.lock();
        inner.batches.push((kind, records.len()));
        let mut assigned = Vec::with_capacity(records.len());
        for rec in records {
            let id = Uuid::new_v4().to_string();
            let doc = with_id(&rec.body, &id);
            inner.records.entry(kind).or_default().push(doc);
            assigned.push(AssignedRecord {
                id,
                correlation: Some(rec.correlation.clone()),
            });
        }
        Ok(assigned)
    }

    fn fetch_photo(&self, person_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.photo(person_id))
    }

    fn save_photo(&self, person_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.seed_photo(person_id, bytes);
        Ok(())
    }

    fn claim_import(&self, fingerprint: &str) -> Result<bool, StoreError> {
        Ok(self.lock().claimed.insert(fingerprint.to_string()))
    }
}
