//! Cryptographic service consumed by the storage engine.
//!
//! Everything here is a thin layer over the RustCrypto primitives: AES-CBC
//! for blocks and metadata archives, SHA-256 for key derivation, and the
//! process RNG for IVs and identities. The engine never touches a cipher
//! directly; it goes through [`cipher::encrypt`] / [`cipher::decrypt`] with
//! a [`MasterKey`] and a 16-byte IV.

pub mod cipher;
pub mod keys;

use thiserror::Error;

/// Length of every initialization vector in a dataset, in bytes.
pub const IV_LEN: usize = 16;

/// Length of the password-derived master key, in bytes.
pub const KEY_LEN: usize = 32;

/// Errors from the cryptographic layer.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Encrypting or decrypting zero bytes is never meaningful for a
    /// CBC-mode cipher, and always indicates a caller bug or a missing file
    /// that should have been handled earlier.
    #[error("nothing to encrypt or decrypt")]
    EmptyInput,

    /// The ciphertext did not decrypt to validly padded plaintext.
    ///
    /// With an unauthenticated cipher this is the only signal available for
    /// a wrong key, a wrong IV, or corrupted ciphertext; the three cases are
    /// indistinguishable.
    #[error("decryption failed: wrong key, wrong IV, or corrupted ciphertext")]
    Decrypt,

    /// An IV read from disk had the wrong length.
    #[error("invalid IV length: expected {IV_LEN} bytes, got {actual}")]
    InvalidIvLength { actual: usize },
}

pub use cipher::{decrypt, encrypt, random_iv, sha256};
pub use keys::MasterKey;
