//! Byte-range I/O over encrypted content blocks.
//!
//! A read or write against arbitrary `(offset, len)` is translated into
//! block-aligned partial operations. Block objects on disk always hold a
//! full block of plaintext (padded with zeros past the written region), so
//! offsets within a block never shift between rewrites.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::crypto::{self, MasterKey};
use crate::store::{BLOCK_SIZE, Block};

use super::{EngineState, SessionError};

/// Path of a block's ciphertext object inside the data directory.
pub(crate) fn block_object_path(data_dir: &Path, block: &Block) -> PathBuf {
    data_dir.join(block.id.to_string())
}

/// Decrypt one block's object into a full-size plaintext buffer.
///
/// The buffer is always [`BLOCK_SIZE`] bytes; a shorter stored plaintext is
/// zero-extended so range arithmetic stays in bounds.
pub(crate) fn read_block_content(
    data_dir: &Path,
    key: &MasterKey,
    block: &Block,
) -> Result<Vec<u8>, SessionError> {
    let ciphertext = fs::read(block_object_path(data_dir, block))?;
    let mut plaintext = crypto::decrypt(&ciphertext, key, &block.iv)?;
    plaintext.resize(BLOCK_SIZE as usize, 0);
    Ok(plaintext)
}

/// Encrypt and persist one block's plaintext, replacing the old object.
pub(crate) fn write_block_content(
    data_dir: &Path,
    key: &MasterKey,
    block: &Block,
    plaintext: &[u8],
) -> Result<(), SessionError> {
    let ciphertext = crypto::encrypt(plaintext, key, &block.iv)?;
    fs::write(block_object_path(data_dir, block), ciphertext)?;
    Ok(())
}

/// Remove a block's ciphertext object. A failure is logged, not fatal; the
/// metadata removal has already happened and must not be rolled back over a
/// stray file.
pub(crate) fn delete_block_object(data_dir: &Path, block: &Block) {
    let path = block_object_path(data_dir, block);
    if let Err(e) = fs::remove_file(&path) {
        warn!(block = %block.id, error = %e, "failed to delete block object");
    }
}

/// Read `len` bytes of file content starting at `offset`.
///
/// The result is always exactly `len` bytes; regions past the logical size
/// and holes with no backing block read as zeros. Only blocks overlapping
/// `[offset, min(size, offset + len)]` are visited.
pub(crate) fn read_range(
    data_dir: &Path,
    key: &MasterKey,
    state: &EngineState,
    file_id: &Uuid,
    size: u64,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, SessionError> {
    let mut out = vec![0u8; len];
    if len == 0 {
        return Ok(out);
    }

    let end = size.min(offset + len as u64);
    let blocks = state.blocks.blocks_in_range(file_id, offset, end);
    trace!(blocks = blocks.len(), offset, len, "reading range");

    let first = (offset / BLOCK_SIZE) as u32;
    let last = (end / BLOCK_SIZE) as u32;
    for index in first..=last {
        let Some(block) = blocks.iter().find(|b| b.index == index) else {
            continue;
        };
        let content = read_block_content(data_dir, key, block)?;

        let block_start = block.start_offset();
        let copy_from = offset.max(block_start);
        // clip to the logical size too: a shrunk file may keep blocks whose
        // stored plaintext extends past it, and those bytes must read as zeros
        let copy_to = (offset + len as u64).min(block_start + BLOCK_SIZE).min(end);
        if copy_to <= copy_from {
            continue;
        }
        let out_from = (copy_from - offset) as usize;
        let out_to = (copy_to - offset) as usize;
        let in_from = (copy_from % BLOCK_SIZE) as usize;
        out[out_from..out_to]
            .copy_from_slice(&content[in_from..in_from + (out_to - out_from)]);
    }
    Ok(out)
}

/// Write `data` into file content starting at `offset`, allocating blocks
/// as needed.
///
/// Every touched block is re-encrypted and persisted immediately. A
/// per-block persist failure is logged and that block is skipped; the call
/// still reports the full `data.len()` so the writer is not stalled on a
/// partially degraded store.
pub(crate) fn write_range(
    data_dir: &Path,
    key: &MasterKey,
    state: &mut EngineState,
    file_id: &Uuid,
    offset: u64,
    data: &[u8],
) -> usize {
    let len = data.len() as u64;
    let first = (offset / BLOCK_SIZE) as u32;
    let last = ((offset + len) / BLOCK_SIZE) as u32;
    debug!(offset, len, first, last, "writing range");

    for index in first..=last {
        let (block, mut content) = match state.blocks.get_at(file_id, index) {
            Some(existing) => {
                let block = existing.clone();
                let content = match read_block_content(data_dir, key, &block) {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(block = %block.id, error = %e, "unreadable block, rewriting from zeros");
                        vec![0u8; BLOCK_SIZE as usize]
                    }
                };
                (block, content)
            }
            None => {
                let block = Block::new(*file_id, index);
                trace!(block = %block.id, index, "allocating block");
                state.blocks.insert(block.clone());
                (block, vec![0u8; BLOCK_SIZE as usize])
            }
        };

        let block_start = block.start_offset();
        let copy_from = offset.max(block_start);
        let copy_to = (offset + len).min(block_start + BLOCK_SIZE);
        if copy_to > copy_from {
            let data_from = (copy_from - offset) as usize;
            let data_to = (copy_to - offset) as usize;
            let in_from = (copy_from % BLOCK_SIZE) as usize;
            content[in_from..in_from + (data_to - data_from)]
                .copy_from_slice(&data[data_from..data_to]);
        }

        if let Err(e) = write_block_content(data_dir, key, &block, &content) {
            warn!(block = %block.id, index, error = %e, "failed to persist block, skipping");
        }
    }
    data.len()
}
