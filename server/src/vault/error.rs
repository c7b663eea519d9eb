use axum::http::StatusCode;
use thiserror::Error;

use crate::storage::StoreError;

/// What the post-decryption integrity check found wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFault {
    MissingSalt,
    MalformedSalt,
    HashMismatch,
}

impl std::fmt::Display for IntegrityFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IntegrityFault::MissingSalt => "missing salt",
            IntegrityFault::MalformedSalt => "malformed salt",
            IntegrityFault::HashMismatch => "hash mismatch",
        })
    }
}

/// Errors surfaced by the record store core.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("malformed device key: {0}")]
    MalformedKey(String),

    #[error("invalid key length {actual} (expected 16, 24 or 32 bytes)")]
    KeyLengthInvalid { actual: usize },

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("integrity check failed: {0}")]
    Integrity(IntegrityFault),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("malformed provenance record: {0}")]
    MalformedRecord(String),

    #[error("stored manifest is not a provenance record: {0}")]
    MalformedManifest(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// HTTP status for this error. Client faults map to 4xx, storage and
    /// crypto faults to 5xx.
    pub fn http_status(&self) -> StatusCode {
        match self {
            VaultError::MalformedKey(_)
            | VaultError::KeyLengthInvalid { .. }
            | VaultError::MalformedRecord(_) => StatusCode::BAD_REQUEST,
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            VaultError::DecryptionFailed
            | VaultError::Integrity(_)
            | VaultError::MalformedManifest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => VaultError::NotFound(path),
            other => VaultError::StoreUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_messages() {
        let e = VaultError::Integrity(IntegrityFault::MissingSalt);
        assert_eq!(e.to_string(), "integrity check failed: missing salt");
        let e = VaultError::Integrity(IntegrityFault::HashMismatch);
        assert_eq!(e.to_string(), "integrity check failed: hash mismatch");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            VaultError::MalformedKey("x".into()).http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            VaultError::KeyLengthInvalid { actual: 3 }.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            VaultError::NotFound("p".into()).http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            VaultError::Integrity(IntegrityFault::HashMismatch).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            VaultError::StoreUnavailable("down".into()).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let e: VaultError = StoreError::NotFound("1/attach/ab".into()).into();
        assert!(matches!(e, VaultError::NotFound(p) if p == "1/attach/ab"));
        let e: VaultError = StoreError::Unavailable("disk".into()).into();
        assert!(matches!(e, VaultError::StoreUnavailable(_)));
        let e: VaultError = StoreError::InvalidPath("../x".into()).into();
        assert!(matches!(e, VaultError::StoreUnavailable(_)));
    }
}
