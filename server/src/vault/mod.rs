//! Encrypted content-addressed record store.
//!
//! Every object is encrypted under the caller's device key with a fresh
//! salt, stored at `<device_id>/<class>/<sha256(ciphertext)>`, and carries
//! metadata holding the salt and the SHA-256 of its plaintext. Reads decrypt
//! and recompute that hash before returning anything.
//!
//! Writes store attachments first and the manifest that references them
//! last. Nothing is ever updated or deleted.

pub mod address;
pub mod crypto;
pub mod error;
pub mod record;
pub mod retrieval;
pub mod routes;

pub use address::{BlobAddress, ObjectClass};
pub use error::{IntegrityFault, VaultError, VaultResult};
pub use record::{DepositReceipt, ProvenanceRecord, RecordAssembler};
pub use retrieval::{RecordStream, RetrievalEngine};

/// Metadata key: declared content type of the plaintext.
pub const META_CONTENT_TYPE: &str = "content-type";
/// Metadata key: hex SHA-256 of the plaintext.
pub const META_CONTENT_HASH: &str = "content-hash";
/// Metadata key: hex CBC IV.
pub const META_SALT: &str = "salt";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const MANIFEST_CONTENT_TYPE: &str = "application/json";

/// Plaintext attachment bytes with their declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Attachment {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}
