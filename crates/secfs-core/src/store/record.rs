//! Archive codec shared by the path index and the block catalog.
//!
//! An archive is the concatenation of fixed-size records with no separators
//! or trailer, encrypted as one unit under the master key and the dataset
//! IV. An empty collection is stored as an empty file (CBC cannot produce
//! zero-length ciphertext, and the original format never did either).
//!
//! The record layouts are version 1 and live with their types
//! ([`super::index::Item`] and [`super::blocks::Block`]); any layout change
//! must bump [`RECORD_VERSION`] and grow a migration path here.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::crypto::{CryptoError, IV_LEN, MasterKey, cipher};

/// Current record layout version.
pub const RECORD_VERSION: u8 = 1;

/// Errors from reading or writing a metadata archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The decrypted archive length is not a whole number of records. This
    /// is a corruption condition, never silently truncated.
    #[error("corrupt archive: {len} bytes is not a multiple of the {record_len}-byte record size")]
    Corrupt { len: usize, record_len: usize },

    #[error("invalid archive record: {0}")]
    InvalidRecord(String),
}

/// Split `data` into fixed-size records and decode each with `decode`.
///
/// Fails with [`ArchiveError::Corrupt`] on a ragged tail.
pub fn decode_records<R>(
    data: &[u8],
    record_len: usize,
    decode: impl Fn(&[u8]) -> Result<R, ArchiveError>,
) -> Result<Vec<R>, ArchiveError> {
    if data.len() % record_len != 0 {
        return Err(ArchiveError::Corrupt {
            len: data.len(),
            record_len,
        });
    }
    data.chunks_exact(record_len).map(decode).collect()
}

/// Encrypt `plaintext` and write it to `path`, replacing any previous
/// archive. An empty plaintext becomes an empty file.
pub fn write_archive(
    path: &Path,
    plaintext: &[u8],
    key: &MasterKey,
    iv: &[u8; IV_LEN],
) -> Result<(), ArchiveError> {
    if plaintext.is_empty() {
        fs::write(path, [])?;
        return Ok(());
    }
    let ciphertext = cipher::encrypt(plaintext, key, iv)?;
    fs::write(path, ciphertext)?;
    Ok(())
}

/// Read and decrypt the archive at `path`. An empty file yields an empty
/// plaintext.
pub fn read_archive(
    path: &Path,
    key: &MasterKey,
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, ArchiveError> {
    let ciphertext = fs::read(path)?;
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    Ok(cipher::decrypt(&ciphertext, key, iv)?)
}
