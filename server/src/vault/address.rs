//! Content addresses: `<namespace>/<class>/<hex sha256(ciphertext)>`.
//!
//! The hash is over the ciphertext, and the ciphertext embeds a fresh salt,
//! so every write lands at a new address. Identical plaintexts are stored
//! twice; nothing is deduplicated.

use std::fmt;

use crate::keys::DeviceId;
use crate::vault::crypto;

/// Length of a hex-encoded SHA-256 hash.
pub const HASH_HEX_LEN: usize = 64;

/// Storage sub-prefix for each kind of object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Attachment,
    Record,
}

impl ObjectClass {
    /// Path segment used in the persisted layout.
    pub fn segment(self) -> &'static str {
        match self {
            ObjectClass::Attachment => "attach",
            ObjectClass::Record => "prov",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "attach" => Some(ObjectClass::Attachment),
            "prov" => Some(ObjectClass::Record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobAddress {
    pub namespace: DeviceId,
    pub class: ObjectClass,
    /// Lowercase hex SHA-256 of the stored ciphertext.
    pub hash: String,
}

impl BlobAddress {
    pub fn for_ciphertext(namespace: DeviceId, class: ObjectClass, ciphertext: &[u8]) -> Self {
        Self {
            namespace,
            class,
            hash: hex::encode(crypto::hash(ciphertext)),
        }
    }

    /// Address of an already known hash. The hash is lowercased.
    pub fn from_hash(namespace: DeviceId, class: ObjectClass, hash: &str) -> Self {
        Self {
            namespace,
            class,
            hash: hash.to_ascii_lowercase(),
        }
    }

    /// Listing prefix covering every object of `class` in `namespace`.
    pub fn prefix(namespace: DeviceId, class: ObjectClass) -> String {
        format!("{}/{}/", namespace, class.segment())
    }

    /// Parse a storage path back into an address.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.split('/');
        let namespace = parts.next()?.parse::<u64>().ok()?;
        let class = ObjectClass::from_segment(parts.next()?)?;
        let hash = parts.next()?;
        if parts.next().is_some() || !is_valid_hash(hash) {
            return None;
        }
        Some(Self::from_hash(DeviceId::from(namespace), class, hash))
    }

    pub fn path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BlobAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.class.segment(), self.hash)
    }
}

/// Whether `text` looks like a hex SHA-256 hash (either case).
pub fn is_valid_hash(text: &str) -> bool {
    text.len() == HASH_HEX_LEN && text.bytes().all(|b| b.is_ascii_hexdigit())
}
