//! Symmetric encryption, hashing, and randomness.

use aes::Aes256;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::trace;

use super::{CryptoError, IV_LEN, KEY_LEN, MasterKey};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypt `plaintext` under `key` and `iv` with AES-256-CBC / PKCS#7.
pub fn encrypt(
    plaintext: &[u8],
    key: &MasterKey,
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyInput);
    }
    let cipher = Aes256CbcEnc::new(key.bytes().into(), iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = ciphertext.len(),
        "encrypted buffer"
    );
    Ok(ciphertext)
}

/// Decrypt `ciphertext` under `key` and `iv`.
///
/// Padding verification is the only integrity signal; see
/// [`CryptoError::Decrypt`].
pub fn decrypt(
    ciphertext: &[u8],
    key: &MasterKey,
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyInput);
    }
    let cipher = Aes256CbcDec::new(key.bytes().into(), iv.into());
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;
    trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len = plaintext.len(),
        "decrypted buffer"
    );
    Ok(plaintext)
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fill `buf` with cryptographically secure random bytes.
pub fn random_bytes(buf: &mut [u8]) {
    rand::rng().fill_bytes(buf);
}

/// Generate a fresh random IV.
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    random_bytes(&mut iv);
    iv
}
