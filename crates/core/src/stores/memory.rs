use crate::error::StoreError;
use crate::models::{CollectionSpec, Record};
use crate::traits::CollectionWriter;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryCollection {
    spec: CollectionSpec,
    records: Vec<Record>,
}

/// Process-local store. Enforces the collection dimension on insert and
/// supports staging promotion.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self, collection: &str) -> Result<Vec<Record>, StoreError> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|entry| entry.records.clone())
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))
    }

    pub async fn spec(&self, collection: &str) -> Option<CollectionSpec> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|entry| entry.spec.clone())
    }
}

#[async_trait]
impl CollectionWriter for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn recreate(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.insert(
            spec.name.clone(),
            MemoryCollection {
                spec: spec.clone(),
                records: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;

        if record.vector.len() != entry.spec.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: entry.spec.dimensions,
                actual: record.vector.len(),
            });
        }

        entry.records.push(record.clone());
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|entry| entry.records.len())
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))
    }

    async fn promote(&self, staging: &str, target: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let mut promoted = collections
            .remove(staging)
            .ok_or_else(|| StoreError::MissingCollection(staging.to_string()))?;
        promoted.spec.name = target.to_string();
        collections.insert(target.to_string(), promoted);
        Ok(())
    }
}
