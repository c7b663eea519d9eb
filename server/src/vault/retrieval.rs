//! Read path: list and open objects under a device namespace.
//!
//! Every object goes through the same check before its plaintext is
//! released:
//! 1. the `salt` metadata must be present and be 16 bytes of hex
//! 2. the body is decrypted with the caller's key and that salt
//! 3. if a `content-hash` is stored, SHA-256 of the plaintext must equal it
//!
//! The hash check is the only tamper detector (CBC is unauthenticated) and
//! the only proof that the right key was used. A padding failure on an
//! object that has a stored hash is reported as a hash mismatch, so a wrong
//! key and a flipped ciphertext byte surface the same way.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

use crate::keys::DeviceKey;
use crate::storage::{ObjectMetadata, ObjectStore, SharedStore};
use crate::vault::address::{BlobAddress, ObjectClass};
use crate::vault::crypto::{self, SALT_SIZE};
use crate::vault::error::{IntegrityFault, VaultError, VaultResult};
use crate::vault::record::ProvenanceRecord;
use crate::vault::{Attachment, DEFAULT_CONTENT_TYPE, META_CONTENT_HASH, META_CONTENT_TYPE, META_SALT};

/// Lazily decrypted manifests, in storage listing order.
pub type RecordStream = BoxStream<'static, VaultResult<ProvenanceRecord>>;

pub struct RetrievalEngine {
    store: SharedStore,
}

impl RetrievalEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Every manifest stored under `key`'s namespace.
    ///
    /// A namespace that was never written yields an empty stream. Objects
    /// are fetched and verified one at a time as the stream is polled; no
    /// ordering is guaranteed beyond what the store's listing produces.
    pub async fn list_records(&self, key: &DeviceKey) -> VaultResult<RecordStream> {
        crypto::check_key_length(key.as_bytes())?;
        let namespace = key.device_id();
        if !self.store.exists(&namespace.to_string()).await? {
            tracing::debug!("Namespace {} has no objects", namespace);
            return Ok(futures::stream::empty().boxed());
        }

        let store = self.store.clone();
        let key = Arc::new(key.clone());
        let records = self
            .store
            .list(&BlobAddress::prefix(namespace, ObjectClass::Record))
            .map_err(VaultError::from)
            .and_then(move |path| {
                let store = store.clone();
                let key = key.clone();
                async move {
                    let (plaintext, _) = open_object(store.as_ref(), key.as_bytes(), &path).await?;
                    serde_json::from_slice::<ProvenanceRecord>(&plaintext)
                        .map_err(|e| VaultError::MalformedManifest(format!("{}: {}", path, e)))
                }
            });
        Ok(records.boxed())
    }

    /// Decrypt the attachment `attachment_id` stored under `key`'s namespace.
    pub async fn get_attachment(
        &self,
        key: &DeviceKey,
        attachment_id: &str,
    ) -> VaultResult<Attachment> {
        crypto::check_key_length(key.as_bytes())?;
        let address =
            BlobAddress::from_hash(key.device_id(), ObjectClass::Attachment, attachment_id);
        let path = address.path();

        let (bytes, metadata) = open_object(self.store.as_ref(), key.as_bytes(), &path).await?;

        let content_type = match metadata.get(META_CONTENT_TYPE) {
            Some(declared) => declared.clone(),
            None => match self.store.content_type(&path).await {
                Ok(stored) if !stored.is_empty() => stored,
                _ => DEFAULT_CONTENT_TYPE.to_string(),
            },
        };

        Ok(Attachment {
            bytes,
            content_type,
        })
    }
}

/// Fetch, decrypt and verify the object at `path`. Returns the plaintext
/// and the metadata it was verified against.
pub(crate) async fn open_object(
    store: &dyn ObjectStore,
    key: &[u8],
    path: &str,
) -> VaultResult<(Vec<u8>, ObjectMetadata)> {
    let metadata = store.get_metadata(path).await?;

    let salt_hex = metadata
        .get(META_SALT)
        .ok_or(VaultError::Integrity(IntegrityFault::MissingSalt))?;
    let salt = hex::decode(salt_hex)
        .ok()
        .filter(|salt| salt.len() == SALT_SIZE)
        .ok_or(VaultError::Integrity(IntegrityFault::MalformedSalt))?;

    let ciphertext = store.get(path).await?;
    let expected_hash = metadata.get(META_CONTENT_HASH);

    let plaintext = match crypto::decrypt(key, &salt, &ciphertext) {
        Ok(plaintext) => plaintext,
        Err(VaultError::DecryptionFailed) if expected_hash.is_some() => {
            return Err(VaultError::Integrity(IntegrityFault::HashMismatch));
        }
        Err(e) => return Err(e),
    };

    if let Some(expected) = expected_hash {
        let matches = hex::decode(expected)
            .map(|expected| expected.as_slice() == crypto::hash(&plaintext).as_slice())
            .unwrap_or(false);
        if !matches {
            return Err(VaultError::Integrity(IntegrityFault::HashMismatch));
        }
    }

    Ok((plaintext, metadata))
}
