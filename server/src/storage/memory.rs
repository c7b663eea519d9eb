//! In-memory object store.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::storage::{
    namespace_of, validate_path, ObjectMetadata, ObjectStore, PathStream, StoreError,
    StoreResult,
};

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Vec<u8>,
    metadata: ObjectMetadata,
    content_type: String,
}

/// Object store held entirely in process memory. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, MemoryObject>,
    namespaces: DashSet<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn object(&self, path: &str) -> StoreResult<MemoryObject> {
        self.objects
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        path: &str,
        body: Vec<u8>,
        metadata: ObjectMetadata,
        content_type: &str,
    ) -> StoreResult<()> {
        validate_path(path)?;
        let namespace = namespace_of(path);
        if !self.namespaces.contains(namespace) {
            return Err(StoreError::NotFound(namespace.to_string()));
        }
        self.objects.insert(
            path.to_string(),
            MemoryObject {
                body,
                metadata,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.object(path).map(|o| o.body)
    }

    async fn get_metadata(&self, path: &str) -> StoreResult<ObjectMetadata> {
        self.object(path).map(|o| o.metadata)
    }

    async fn content_type(&self, path: &str) -> StoreResult<String> {
        self.object(path).map(|o| o.content_type)
    }

    fn list(&self, prefix: &str) -> PathStream {
        let mut paths: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        Box::pin(futures::stream::iter(paths.into_iter().map(Ok)))
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.namespaces.contains(path) || self.objects.contains_key(path))
    }

    async fn ensure_namespace(&self, namespace: &str) -> StoreResult<()> {
        validate_path(namespace)?;
        self.namespaces.insert(namespace.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn meta(pairs: &[(&str, &str)]) -> ObjectMetadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryObjectStore::new();
        store.ensure_namespace("1").await.unwrap();
        store
            .put("1/attach/aa", b"body".to_vec(), meta(&[("salt", "00")]), "text/plain")
            .await
            .unwrap();

        assert_eq!(store.get("1/attach/aa").await.unwrap(), b"body");
        assert_eq!(store.get_metadata("1/attach/aa").await.unwrap()["salt"], "00");
        assert_eq!(store.content_type("1/attach/aa").await.unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_put_requires_namespace() {
        let store = MemoryObjectStore::new();
        let err = store
            .put("9/prov/aa", vec![], ObjectMetadata::new(), "application/json")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ns) if ns == "9"));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.get("1/attach/none").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_metadata("1/attach/none").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = MemoryObjectStore::new();
        store.ensure_namespace("1").await.unwrap();
        store.ensure_namespace("12").await.unwrap();
        for path in ["1/prov/b", "1/prov/a", "1/attach/c", "12/prov/d"] {
            store
                .put(path, vec![1], ObjectMetadata::new(), "application/octet-stream")
                .await
                .unwrap();
        }
        let listed: Vec<String> = store.list("1/prov/").try_collect().await.unwrap();
        assert_eq!(listed, vec!["1/prov/a".to_string(), "1/prov/b".to_string()]);
    }

    #[tokio::test]
    async fn test_exists_covers_namespaces_and_objects() {
        let store = MemoryObjectStore::new();
        assert!(!store.exists("5").await.unwrap());
        store.ensure_namespace("5").await.unwrap();
        store.ensure_namespace("5").await.unwrap();
        assert!(store.exists("5").await.unwrap());
        store
            .put("5/prov/x", vec![], ObjectMetadata::new(), "application/json")
            .await
            .unwrap();
        assert!(store.exists("5/prov/x").await.unwrap());
        assert!(!store.exists("5/prov/y").await.unwrap());
    }
}
