//! Write path: encrypt attachments, then the manifest that names them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keys::{DeviceId, DeviceKey};
use crate::storage::{ObjectMetadata, SharedStore};
use crate::vault::address::{BlobAddress, ObjectClass};
use crate::vault::crypto;
use crate::vault::error::{VaultError, VaultResult};
use crate::vault::{
    Attachment, META_CONTENT_HASH, META_CONTENT_TYPE, META_SALT, MANIFEST_CONTENT_TYPE,
};

/// The manifest that is encrypted and stored for every deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub record: Value,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Hashes of everything a deposit wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub record: String,
    pub attachments: Vec<String>,
}

/// Parse a relaxed-JSON (JSON5) record payload.
pub fn parse_relaxed_record(text: &str) -> VaultResult<Value> {
    json5::from_str::<Value>(text).map_err(|e| VaultError::MalformedRecord(e.to_string()))
}

pub struct RecordAssembler {
    store: SharedStore,
}

impl RecordAssembler {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Store `attachments` and a manifest referencing them, in that order.
    ///
    /// A failure aborts the deposit. Attachments already written by this
    /// call stay in place; they are unreachable without a manifest.
    pub async fn deposit(
        &self,
        key: &DeviceKey,
        record: Value,
        attachments: Vec<Attachment>,
    ) -> VaultResult<DepositReceipt> {
        crypto::check_key_length(key.as_bytes())?;
        let namespace = key.device_id();
        self.store.ensure_namespace(&namespace.to_string()).await?;

        let mut attachment_ids = Vec::with_capacity(attachments.len());
        for attachment in &attachments {
            let address = self
                .seal_and_store(
                    key,
                    namespace,
                    ObjectClass::Attachment,
                    &attachment.bytes,
                    &attachment.content_type,
                )
                .await?;
            attachment_ids.push(address.hash);
        }

        let manifest = ProvenanceRecord {
            record,
            attachments: attachment_ids,
        };
        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|e| VaultError::MalformedRecord(e.to_string()))?;
        let address = self
            .seal_and_store(
                key,
                namespace,
                ObjectClass::Record,
                &manifest_bytes,
                MANIFEST_CONTENT_TYPE,
            )
            .await?;

        tracing::debug!(
            "Deposited record {} with {} attachment(s) in namespace {}",
            address.hash,
            manifest.attachments.len(),
            namespace
        );

        Ok(DepositReceipt {
            record: address.hash,
            attachments: manifest.attachments,
        })
    }

    async fn seal_and_store(
        &self,
        key: &DeviceKey,
        namespace: DeviceId,
        class: ObjectClass,
        plaintext: &[u8],
        content_type: &str,
    ) -> VaultResult<BlobAddress> {
        let sealed = crypto::encrypt(key.as_bytes(), plaintext)?;
        let address = BlobAddress::for_ciphertext(namespace, class, &sealed.ciphertext);

        let mut metadata = ObjectMetadata::new();
        metadata.insert(META_CONTENT_TYPE.to_string(), content_type.to_string());
        metadata.insert(
            META_CONTENT_HASH.to_string(),
            hex::encode(crypto::hash(plaintext)),
        );
        metadata.insert(META_SALT.to_string(), hex::encode(sealed.salt));

        let size = sealed.ciphertext.len();
        self.store
            .put(&address.path(), sealed.ciphertext, metadata, content_type)
            .await?;

        tracing::debug!("Stored {} ({} bytes encrypted)", address, size);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, ObjectStore, PathStream, StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn test_key() -> DeviceKey {
        DeviceKey::from_bytes(vec![0x42; 16])
    }

    /// Records the order of puts and can fail on a chosen one.
    struct RecordingStore {
        inner: MemoryObjectStore,
        puts: Mutex<Vec<String>>,
        fail_on_put: Option<usize>,
    }

    impl RecordingStore {
        fn new(fail_on_put: Option<usize>) -> Self {
            Self {
                inner: MemoryObjectStore::new(),
                puts: Mutex::new(Vec::new()),
                fail_on_put,
            }
        }
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put(
            &self,
            path: &str,
            body: Vec<u8>,
            metadata: ObjectMetadata,
            content_type: &str,
        ) -> StoreResult<()> {
            let n = {
                let mut puts = self.puts.lock().unwrap();
                puts.push(path.to_string());
                puts.len()
            };
            if self.fail_on_put == Some(n) {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.inner.put(path, body, metadata, content_type).await
        }
        async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
            self.inner.get(path).await
        }
        async fn get_metadata(&self, path: &str) -> StoreResult<ObjectMetadata> {
            self.inner.get_metadata(path).await
        }
        async fn content_type(&self, path: &str) -> StoreResult<String> {
            self.inner.content_type(path).await
        }
        fn list(&self, prefix: &str) -> PathStream {
            self.inner.list(prefix)
        }
        async fn exists(&self, path: &str) -> StoreResult<bool> {
            self.inner.exists(path).await
        }
        async fn ensure_namespace(&self, namespace: &str) -> StoreResult<()> {
            self.inner.ensure_namespace(namespace).await
        }
    }

    #[tokio::test]
    async fn test_deposit_writes_attachments_before_manifest() {
        let store = Arc::new(RecordingStore::new(None));
        let assembler = RecordAssembler::new(store.clone());
        let receipt = assembler
            .deposit(
                &test_key(),
                json!({"id": 1}),
                vec![
                    Attachment::new(b"one".to_vec(), "text/plain"),
                    Attachment::new(b"two".to_vec(), "image/png"),
                ],
            )
            .await
            .unwrap();

        let puts = store.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 3);
        let ns = test_key().device_id();
        assert_eq!(puts[0], format!("{}/attach/{}", ns, receipt.attachments[0]));
        assert_eq!(puts[1], format!("{}/attach/{}", ns, receipt.attachments[1]));
        assert_eq!(puts[2], format!("{}/prov/{}", ns, receipt.record));
    }

    #[tokio::test]
    async fn test_metadata_contract() {
        let store = Arc::new(MemoryObjectStore::new());
        let assembler = RecordAssembler::new(store.clone());
        let key = test_key();
        let receipt = assembler
            .deposit(&key, json!({"id": 1}), vec![Attachment::new(b"hi".to_vec(), "text/plain")])
            .await
            .unwrap();

        let path = format!("{}/attach/{}", key.device_id(), receipt.attachments[0]);
        let meta = store.get_metadata(&path).await.unwrap();
        assert_eq!(meta[META_CONTENT_TYPE], "text/plain");
        assert_eq!(
            meta[META_CONTENT_HASH],
            "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4"
        );
        assert_eq!(meta[META_SALT].len(), 32);
        assert_eq!(store.content_type(&path).await.unwrap(), "text/plain");

        // The address is the hash of what was stored, not of the plaintext
        let body = store.get(&path).await.unwrap();
        assert_eq!(hex::encode(crypto::hash(&body)), receipt.attachments[0]);
    }

    #[tokio::test]
    async fn test_same_plaintext_twice_yields_two_objects() {
        let store = Arc::new(MemoryObjectStore::new());
        let assembler = RecordAssembler::new(store.clone());
        let key = test_key();
        let a = assembler
            .deposit(&key, json!({"id": 1}), vec![Attachment::new(b"x".to_vec(), "text/plain")])
            .await
            .unwrap();
        let b = assembler
            .deposit(&key, json!({"id": 1}), vec![Attachment::new(b"x".to_vec(), "text/plain")])
            .await
            .unwrap();

        assert_ne!(a.record, b.record);
        assert_ne!(a.attachments, b.attachments);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_manifest_write_leaves_attachments() {
        let store = Arc::new(RecordingStore::new(Some(3)));
        let assembler = RecordAssembler::new(store.clone());
        let err = assembler
            .deposit(
                &test_key(),
                json!({"id": 2}),
                vec![
                    Attachment::new(b"a".to_vec(), "text/plain"),
                    Attachment::new(b"b".to_vec(), "text/plain"),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::StoreUnavailable(_)));
        assert_eq!(store.inner.len(), 2);
        let puts = store.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 3);
        assert!(puts[2].starts_with(&format!("{}/prov/", test_key().device_id())));
        assert!(!store.inner.exists(&puts[2]).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_attachment_write_aborts_before_manifest() {
        let store = Arc::new(RecordingStore::new(Some(1)));
        let assembler = RecordAssembler::new(store.clone());
        let result = assembler
            .deposit(
                &test_key(),
                json!({}),
                vec![
                    Attachment::new(b"a".to_vec(), "text/plain"),
                    Attachment::new(b"b".to_vec(), "text/plain"),
                ],
            )
            .await;

        assert!(result.is_err());
        assert_eq!(store.puts.lock().unwrap().len(), 1);
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_bad_key_length_touches_nothing() {
        let store = Arc::new(MemoryObjectStore::new());
        let assembler = RecordAssembler::new(store.clone());
        let key = DeviceKey::from_bytes(vec![1; 10]);
        let err = assembler.deposit(&key, json!({}), vec![]).await.unwrap_err();
        assert!(matches!(err, VaultError::KeyLengthInvalid { actual: 10 }));
        assert!(!store.exists(&key.device_id().to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_without_attachments() {
        let store = Arc::new(MemoryObjectStore::new());
        let receipt = RecordAssembler::new(store.clone())
            .deposit(&test_key(), json!({"note": "bare"}), vec![])
            .await
            .unwrap();
        assert!(receipt.attachments.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_parse_relaxed_record() {
        let value = parse_relaxed_record("{id: 95, title: 'Belt', price: 930,}").unwrap();
        assert_eq!(value, json!({"id": 95, "title": "Belt", "price": 930}));
    }

    #[test]
    fn test_parse_relaxed_record_rejects_garbage() {
        assert!(matches!(
            parse_relaxed_record("{id: "),
            Err(VaultError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_manifest_serialization_order() {
        let manifest = ProvenanceRecord {
            record: json!({"id": 1}),
            attachments: vec!["ab".to_string()],
        };
        assert_eq!(
            serde_json::to_string(&manifest).unwrap(),
            r#"{"record":{"id":1},"attachments":["ab"]}"#
        );
    }
}
