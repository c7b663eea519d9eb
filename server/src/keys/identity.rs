//! Stable, non-secret device identifiers.
//!
//! The id is 64-bit FNV-1 over the raw key bytes: multiply by the prime,
//! then XOR the byte. This is FNV-1, not FNV-1a, and existing storage
//! layouts depend on the exact ordering.

use std::fmt;

const FNV_OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// Namespace identifier derived from a device key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn derive(raw_key: &[u8]) -> Self {
        let hash = raw_key.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
            hash.wrapping_mul(FNV_PRIME) ^ u64::from(*byte)
        });
        Self(hash)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for DeviceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
