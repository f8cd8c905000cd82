use crate::error::{StoreError, SyncError};
use crate::models::{CollectionSpec, Record, RemoteFile};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait CollectionWriter: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Drops `spec.name` if it exists, then creates it empty with the given
    /// dimension and metric. A missing collection is not an error.
    async fn recreate(&self, spec: &CollectionSpec) -> Result<(), StoreError>;

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError>;

    async fn count(&self, collection: &str) -> Result<usize, StoreError>;

    /// Replaces `target` with the contents of `staging`, removing `staging`.
    async fn promote(&self, _staging: &str, _target: &str) -> Result<(), StoreError> {
        Err(StoreError::Unsupported {
            backend: self.backend().to_string(),
            operation: "promote".to_string(),
        })
    }
}

#[async_trait]
impl<T: CollectionWriter + ?Sized> CollectionWriter for Arc<T> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    async fn recreate(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        (**self).recreate(spec).await
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        (**self).insert(collection, record).await
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        (**self).count(collection).await
    }

    async fn promote(&self, staging: &str, target: &str) -> Result<(), StoreError> {
        (**self).promote(staging, target).await
    }
}

#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteFile>, SyncError>;

    /// Streams the file's content (exported when it is an editable format)
    /// into `dest`.
    async fn fetch(&self, file: &RemoteFile, dest: &Path) -> Result<(), SyncError>;
}
