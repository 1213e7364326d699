//! In-memory identifier registry for testing and ephemeral use.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{RegistryError, Result};
use crate::traits::{check_token, IdentifierRegistry};
use crate::types::RegistryRecord;

/// An in-memory implementation of [`IdentifierRegistry`].
///
/// Records live in a `BTreeMap` behind a `RwLock`; the map key is the
/// unique constraint. Data is lost when the registry is dropped.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: RwLock<BTreeMap<String, RegistryRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> RegistryError {
    RegistryError::Serialization(format!("lock poisoned: {e}"))
}

impl IdentifierRegistry for InMemoryRegistry {
    fn contains(&self, token: &str) -> Result<bool> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.contains_key(token))
    }

    fn insert(&self, token: &str) -> Result<RegistryRecord> {
        check_token(token)?;
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(token) {
            return Err(RegistryError::AlreadyExists {
                token: token.to_string(),
            });
        }
        let record = RegistryRecord::now(token);
        records.insert(token.to_string(), record.clone());
        Ok(record)
    }

    fn remove(&self, token: &str) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records
            .remove(token)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound {
                token: token.to_string(),
            })
    }

    fn get(&self, token: &str) -> Result<Option<RegistryRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(token).cloned())
    }

    fn list(&self) -> Result<Vec<String>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.keys().cloned().collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
