//! Object store boundary: named binary objects with string metadata.
//!
//! Paths are `/`-separated and relative (`<namespace>/<class>/<hash>`). A
//! namespace is the first path segment and must be created with
//! [`ObjectStore::ensure_namespace`] before objects are written under it.
//!
//! Implementations:
//! - [`local::LocalObjectStore`]: files on disk, SQLite metadata index
//! - [`memory::MemoryObjectStore`]: in-process, for tests and throwaway runs
//! - [`retry::RetryingStore`]: bounded backoff around any other store

pub mod local;
pub mod memory;
pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use retry::{RetryPolicy, RetryingStore};

/// String metadata attached to an object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Lazy, finite, non-restartable sequence of object paths.
pub type PathStream = BoxStream<'static, StoreResult<String>>;

/// Shared store handle, built once at startup.
pub type SharedStore = Arc<dyn ObjectStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` at `path`. An existing object at the same path is
    /// replaced; content-addressed callers never reuse a path.
    async fn put(
        &self,
        path: &str,
        body: Vec<u8>,
        metadata: ObjectMetadata,
        content_type: &str,
    ) -> StoreResult<()>;

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>>;

    async fn get_metadata(&self, path: &str) -> StoreResult<ObjectMetadata>;

    /// Content type recorded by `put`.
    async fn content_type(&self, path: &str) -> StoreResult<String>;

    /// Paths starting with `prefix`, produced on demand.
    fn list(&self, prefix: &str) -> PathStream;

    /// Whether a namespace or an object exists at `path`.
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Create `namespace` if it does not exist yet.
    async fn ensure_namespace(&self, namespace: &str) -> StoreResult<()>;
}

/// Reject paths that could escape the store root or alias other objects.
pub fn validate_path(path: &str) -> StoreResult<()> {
    let invalid = path.is_empty()
        || path.contains('\\')
        || path.contains('\0')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// First segment of a path: the namespace it lives in.
pub fn namespace_of(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}
