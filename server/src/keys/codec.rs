//! Base58 (Bitcoin alphabet) text form of device keys.

use crate::vault::VaultError;

/// Decode a Base58 key into raw bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, VaultError> {
    if text.is_empty() {
        return Err(VaultError::MalformedKey("empty device key".to_string()));
    }
    bs58::decode(text)
        .into_vec()
        .map_err(|e| VaultError::MalformedKey(e.to_string()))
}

/// Encode raw key bytes as Base58.
pub fn encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}
