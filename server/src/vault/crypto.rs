//! AES-CBC encryption keyed by the device key, with a fresh random salt
//! used as the IV for every call.
//!
//! Wire format: the object body is the raw ciphertext (PKCS#7 padded). The
//! salt travels separately as object metadata. CBC carries no
//! authentication; tamper detection is the plaintext hash checked by the
//! retrieval path.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::vault::error::{VaultError, VaultResult};

/// Salt (CBC IV) length in bytes.
pub const SALT_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;

/// Ciphertext plus the salt needed to open it.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub salt: [u8; SALT_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Fail with `KeyLengthInvalid` unless `key` is an AES-128/192/256 key.
pub fn check_key_length(key: &[u8]) -> VaultResult<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        actual => Err(VaultError::KeyLengthInvalid { actual }),
    }
}

/// Encrypt `plaintext` under `key` with a freshly generated salt.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> VaultResult<Sealed> {
    let salt: [u8; SALT_SIZE] = rand::rng().random();
    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, &salt)
            .map_err(|_| VaultError::KeyLengthInvalid { actual: key.len() })?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, &salt)
            .map_err(|_| VaultError::KeyLengthInvalid { actual: key.len() })?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, &salt)
            .map_err(|_| VaultError::KeyLengthInvalid { actual: key.len() })?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        actual => return Err(VaultError::KeyLengthInvalid { actual }),
    };
    Ok(Sealed { salt, ciphertext })
}

/// Decrypt `ciphertext` produced by [`encrypt`].
///
/// A wrong key of valid length either fails the padding check here or
/// yields garbage that the caller's hash check rejects.
pub fn decrypt(key: &[u8], salt: &[u8], ciphertext: &[u8]) -> VaultResult<Vec<u8>> {
    if salt.len() != SALT_SIZE
        || ciphertext.is_empty()
        || ciphertext.len() % BLOCK_SIZE != 0
    {
        return Err(VaultError::DecryptionFailed);
    }
    let result = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, salt)
            .map_err(|_| VaultError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, salt)
            .map_err(|_| VaultError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, salt)
            .map_err(|_| VaultError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        actual => return Err(VaultError::KeyLengthInvalid { actual }),
    };
    result.map_err(|_| VaultError::DecryptionFailed)
}

/// SHA-256 of `bytes`.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}
