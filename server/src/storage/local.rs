//! Filesystem object store with a SQLite metadata index.
//!
//! Storage layout:
//! - body at `{root}/{path}` (e.g. `{data_dir}/{container}/{device_id}/attach/{hash}`)
//! - row in the `objects` table holding content type, metadata and size
//!
//! The body is written and synced before its index row is inserted, so a
//! listing never yields a path whose body is missing.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::DbPool;
use crate::storage::{
    namespace_of, validate_path, ObjectMetadata, ObjectStore, PathStream, StoreError,
    StoreResult,
};

/// Default number of paths fetched per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct LocalObjectStore {
    db: DbPool,
    root: PathBuf,
    page_size: usize,
}

impl LocalObjectStore {
    /// Open a store whose bodies live under `root`. `root` is created if
    /// missing.
    pub fn open(db: DbPool, root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StoreError::Unavailable(format!("failed to create {}: {}", root.display(), e))
        })?;
        Ok(Self {
            db,
            root,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn body_path(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg))
    }

    /// Run blocking file/SQLite work off the async executor.
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(LocalObjectStore) -> StoreResult<T> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| StoreError::Unavailable(format!("task join error: {}", e)))?
    }

    fn lookup_row(&self, path: &str) -> StoreResult<(String, String)> {
        let conn = self.db.lock().map_err(lock_error)?;
        conn.query_row(
            "SELECT content_type, metadata FROM objects WHERE path = ?1",
            [path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(sql_error)?
        .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn namespace_known(&self, namespace: &str) -> StoreResult<bool> {
        let conn = self.db.lock().map_err(lock_error)?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM namespaces WHERE name = ?1)",
            [namespace],
            |row| row.get(0),
        )
        .map_err(sql_error)
    }

    fn list_page(&self, prefix: &str, after: Option<&str>) -> StoreResult<Vec<String>> {
        let conn = self.db.lock().map_err(lock_error)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT path FROM objects
                 WHERE substr(path, 1, length(?1)) = ?1 AND path > ?2
                 ORDER BY path
                 LIMIT ?3",
            )
            .map_err(sql_error)?;
        let rows = stmt
            .query_map(
                rusqlite::params![prefix, after.unwrap_or(""), self.page_size as i64],
                |row| row.get::<_, String>(0),
            )
            .map_err(sql_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql_error)
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Unavailable(format!("DB lock error: {}", e))
}

fn sql_error(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("index query failed: {}", e))
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {}", path.display(), e))
}

/// Paging state for [`LocalObjectStore::list`].
struct ListCursor {
    store: LocalObjectStore,
    prefix: String,
    after: Option<String>,
    buffered: std::vec::IntoIter<String>,
    exhausted: bool,
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        path: &str,
        body: Vec<u8>,
        metadata: ObjectMetadata,
        content_type: &str,
    ) -> StoreResult<()> {
        validate_path(path)?;
        let path = path.to_string();
        let content_type = content_type.to_string();
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| StoreError::Unavailable(format!("metadata encoding failed: {}", e)))?;

        self.blocking(move |store| {
            let namespace = namespace_of(&path).to_string();
            if !store.namespace_known(&namespace)? {
                return Err(StoreError::NotFound(namespace));
            }

            let file_path = store.body_path(&path);
            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
            }
            let mut file = std::fs::File::create(&file_path).map_err(|e| io_error(&file_path, e))?;
            file.write_all(&body).map_err(|e| io_error(&file_path, e))?;
            file.sync_all().map_err(|e| io_error(&file_path, e))?;

            let conn = store.db.lock().map_err(lock_error)?;
            conn.execute(
                "INSERT OR REPLACE INTO objects (path, namespace, content_type, metadata, size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    path,
                    namespace,
                    content_type,
                    metadata_json,
                    body.len() as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(sql_error)?;

            tracing::debug!("Stored object {} ({} bytes)", path, body.len());
            Ok(())
        })
        .await
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        validate_path(path)?;
        let path = path.to_string();
        self.blocking(move |store| {
            store.lookup_row(&path)?;
            let file_path = store.body_path(&path);
            std::fs::read(&file_path).map_err(|e| io_error(&file_path, e))
        })
        .await
    }

    async fn get_metadata(&self, path: &str) -> StoreResult<ObjectMetadata> {
        validate_path(path)?;
        let path = path.to_string();
        self.blocking(move |store| {
            let (_, metadata) = store.lookup_row(&path)?;
            serde_json::from_str(&metadata).map_err(|e| {
                StoreError::Unavailable(format!("corrupt metadata for {}: {}", path, e))
            })
        })
        .await
    }

    async fn content_type(&self, path: &str) -> StoreResult<String> {
        validate_path(path)?;
        let path = path.to_string();
        self.blocking(move |store| store.lookup_row(&path).map(|(content_type, _)| content_type))
            .await
    }

    fn list(&self, prefix: &str) -> PathStream {
        let cursor = ListCursor {
            store: self.clone(),
            prefix: prefix.to_string(),
            after: None,
            buffered: Vec::new().into_iter(),
            exhausted: false,
        };

        Box::pin(futures::stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(path) = cursor.buffered.next() {
                    cursor.after = Some(path.clone());
                    return Some((Ok(path), cursor));
                }
                if cursor.exhausted {
                    return None;
                }

                let prefix = cursor.prefix.clone();
                let after = cursor.after.clone();
                let page = cursor
                    .store
                    .blocking(move |store| store.list_page(&prefix, after.as_deref()))
                    .await;
                match page {
                    Ok(page) => {
                        cursor.exhausted = page.len() < cursor.store.page_size;
                        cursor.buffered = page.into_iter();
                    }
                    Err(e) => {
                        // Stop after reporting; a listing is not restartable.
                        cursor.exhausted = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        }))
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        validate_path(path)?;
        let path = path.to_string();
        self.blocking(move |store| {
            let conn = store.db.lock().map_err(lock_error)?;
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM namespaces WHERE name = ?1)
                     OR EXISTS(SELECT 1 FROM objects WHERE path = ?1)",
                [&path],
                |row| row.get(0),
            )
            .map_err(sql_error)
        })
        .await
    }

    async fn ensure_namespace(&self, namespace: &str) -> StoreResult<()> {
        validate_path(namespace)?;
        let namespace = namespace.to_string();
        self.blocking(move |store| {
            let dir = store.body_path(&namespace);
            std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

            let conn = store.db.lock().map_err(lock_error)?;
            let created = conn
                .execute(
                    "INSERT OR IGNORE INTO namespaces (name, created_at) VALUES (?1, ?2)",
                    rusqlite::params![namespace, Utc::now().to_rfc3339()],
                )
                .map_err(sql_error)?;
            if created > 0 {
                tracing::info!("Created namespace {}", namespace);
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use futures::{StreamExt, TryStreamExt};

    fn open_store(tmp: &tempfile::TempDir) -> LocalObjectStore {
        let data_dir = tmp.path().to_str().unwrap();
        let pool = db::init_db(data_dir).unwrap();
        LocalObjectStore::open(pool, tmp.path().join("provenance")).unwrap()
    }

    fn salt_meta() -> ObjectMetadata {
        let mut meta = ObjectMetadata::new();
        meta.insert("salt".to_string(), "00".repeat(16));
        meta
    }

    #[tokio::test]
    async fn test_put_writes_body_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        store.ensure_namespace("7").await.unwrap();
        store
            .put("7/attach/abc", b"cipher".to_vec(), salt_meta(), "image/png")
            .await
            .unwrap();

        let on_disk = tmp.path().join("provenance").join("7").join("attach").join("abc");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"cipher");
        assert_eq!(store.get("7/attach/abc").await.unwrap(), b"cipher");
        assert_eq!(store.content_type("7/attach/abc").await.unwrap(), "image/png");
        assert_eq!(store.get_metadata("7/attach/abc").await.unwrap(), salt_meta());
    }

    #[tokio::test]
    async fn test_put_into_unknown_namespace_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        let err = store
            .put("8/prov/abc", vec![1], salt_meta(), "application/json")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ns) if ns == "8"));
        assert!(!tmp.path().join("provenance/8/prov/abc").exists());
    }

    #[tokio::test]
    async fn test_objects_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open_store(&tmp);
            store.ensure_namespace("1").await.unwrap();
            store
                .put("1/prov/aa", b"x".to_vec(), salt_meta(), "application/json")
                .await
                .unwrap();
        }
        let store = open_store(&tmp);
        assert!(store.exists("1").await.unwrap());
        assert_eq!(store.get("1/prov/aa").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        assert!(matches!(store.get("1/prov/zz").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.get_metadata("1/prov/zz").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.exists("1/prov/zz").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        assert!(matches!(
            store.ensure_namespace("..").await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            store.get("1/../../etc/passwd").await,
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pages_lazily_across_boundaries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp).with_page_size(2);
        store.ensure_namespace("3").await.unwrap();
        store.ensure_namespace("33").await.unwrap();
        for i in 0..5 {
            store
                .put(&format!("3/prov/{i:02}"), vec![i], salt_meta(), "application/json")
                .await
                .unwrap();
        }
        store
            .put("3/attach/zz", vec![9], salt_meta(), "text/plain")
            .await
            .unwrap();
        store
            .put("33/prov/00", vec![9], salt_meta(), "application/json")
            .await
            .unwrap();

        let listed: Vec<String> = store.list("3/prov/").try_collect().await.unwrap();
        assert_eq!(
            listed,
            vec!["3/prov/00", "3/prov/01", "3/prov/02", "3/prov/03", "3/prov/04"]
        );

        // The first item is available without draining the listing
        let mut stream = store.list("3/");
        assert_eq!(stream.next().await.unwrap().unwrap(), "3/attach/zz");
    }

    #[tokio::test]
    async fn test_list_empty_prefix_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        let listed: Vec<String> = store.list("404/prov/").try_collect().await.unwrap();
        assert!(listed.is_empty());
    }
}
