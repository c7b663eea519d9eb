//! Device keys: the client-held secret that both names a storage namespace
//! and keys the symmetric cipher.
//!
//! A key arrives Base58-encoded in the request path, is decoded once per
//! request and is zeroized when the last copy drops. It is never logged or
//! persisted; only the derived [`DeviceId`] appears in storage paths and logs.

pub mod codec;
pub mod identity;

use std::fmt;

use zeroize::Zeroizing;

use crate::vault::VaultError;

pub use identity::DeviceId;

/// Raw device key bytes, wiped from memory on drop.
#[derive(Clone)]
pub struct DeviceKey(Zeroizing<Vec<u8>>);

impl DeviceKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Decode a key from its Base58 wire form.
    pub fn from_encoded(text: &str) -> Result<Self, VaultError> {
        codec::decode(text).map(Self::from_bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base58 wire form of this key.
    pub fn encoded(&self) -> String {
        codec::encode(&self.0)
    }

    /// Namespace under which every object written with this key lives.
    pub fn device_id(&self) -> DeviceId {
        DeviceId::derive(&self.0)
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(<redacted>)")
    }
}
