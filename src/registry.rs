use crate::error::{MigrateError, Result};
use crate::model::{EntityType, RefField};
use std::collections::HashMap;

/// Run-scoped map from `(entity type, import key)` to the id the store
/// assigned. Append-only: a key is never re-pointed once registered.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    ids: HashMap<(EntityType, String), String>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EntityType, import_key: &str, assigned_id: &str) -> Result<()> {
        let slot = (kind, import_key.to_string());
        if let Some(existing) = self.ids.get(&slot) {
            if existing == assigned_id {
                return Ok(());
            }
            return Err(MigrateError::DuplicateRegistration {
                entity: kind,
                import_key: import_key.to_string(),
                existing: existing.clone(),
            });
        }
        self.ids.insert(slot, assigned_id.to_string());
        Ok(())
    }

    pub fn get(&self, kind: EntityType, import_key: &str) -> Option<&str> {
        self.ids
            .get(&(kind, import_key.to_string()))
            .map(String::as_str)
    }

    /// Resolve a reference held by `owner` (an entity of type `owner_kind`).
    ///
    /// Returns `Ok(None)` for an unresolved optional reference and an error
    /// for an unresolved required one.
    pub fn resolve(
        &self,
        owner_kind: EntityType,
        owner_key: &str,
        field: &RefField,
        key: &str,
    ) -> Result<Option<String>> {
        match self.get(field.target, key) {
            Some(id) => Ok(Some(id.to_string())),
            None if field.required => Err(MigrateError::UnresolvedReference {
                entity: owner_kind,
                import_key: owner_key.to_string(),
                field: field.field,
                target: field.target,
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn count(&self, kind: EntityType) -> usize {
        self.ids.keys().filter(|(k, _)| *k == kind).count()
    }
}
