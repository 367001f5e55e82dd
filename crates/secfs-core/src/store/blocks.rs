//! Block metadata: which fixed-size ciphertext objects make up each file.
//!
//! Content is split into 512 KiB blocks. The block store holds only the
//! metadata (identity, owning file, position, IV); the ciphertext itself
//! lives in per-block objects on disk, managed by the session I/O layer.

use std::collections::HashMap;

use uuid::Uuid;

use crate::crypto::{IV_LEN, random_iv};

use super::record::{ArchiveError, decode_records};

/// Plaintext capacity of one block in bytes (512 KiB).
pub const BLOCK_SIZE: u64 = 524_288;

/// Serialized length of one [`Block`]: id (16) + file id (16) +
/// index (4) + IV (16).
pub const BLOCK_RECORD_LEN: usize = 16 + 16 + 4 + IV_LEN;

/// Metadata for one encrypted content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Names the ciphertext object in the data directory.
    pub id: Uuid,
    /// The file this block belongs to.
    pub file_id: Uuid,
    /// Zero-based position within the file.
    pub index: u32,
    /// IV for this block's ciphertext. Assigned once at creation and
    /// reused for every rewrite of the block, a known weakness of the
    /// on-disk format.
    pub iv: [u8; IV_LEN],
}

impl Block {
    /// Allocate metadata for a new block with a fresh random IV.
    pub fn new(file_id: Uuid, index: u32) -> Self {
        Block {
            id: Uuid::new_v4(),
            file_id,
            index,
            iv: random_iv(),
        }
    }

    /// Byte offset of this block's first byte within the file.
    pub fn start_offset(&self) -> u64 {
        u64::from(self.index) * BLOCK_SIZE
    }

    fn encode_record(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(self.file_id.as_bytes());
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.iv);
    }

    fn decode_record(buf: &[u8]) -> Result<Self, ArchiveError> {
        debug_assert_eq!(buf.len(), BLOCK_RECORD_LEN);
        let id = Uuid::from_slice(&buf[0..16])
            .map_err(|e| ArchiveError::InvalidRecord(e.to_string()))?;
        let file_id = Uuid::from_slice(&buf[16..32])
            .map_err(|e| ArchiveError::InvalidRecord(e.to_string()))?;
        let index = u32::from_be_bytes(buf[32..36].try_into().expect("4-byte slice"));
        let iv: [u8; IV_LEN] = buf[36..36 + IV_LEN].try_into().expect("IV-length slice");
        Ok(Block { id, file_id, index, iv })
    }
}

/// All block metadata in a dataset, queryable by (file, index).
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: HashMap<Uuid, Block>,
    by_position: HashMap<(Uuid, u32), Uuid>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: Block) {
        self.by_position.insert((block.file_id, block.index), block.id);
        self.blocks.insert(block.id, block);
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Block> {
        let block = self.blocks.remove(id)?;
        self.by_position.remove(&(block.file_id, block.index));
        Some(block)
    }

    /// The block at `index` of file `file_id`, if it exists yet.
    pub fn get_at(&self, file_id: &Uuid, index: u32) -> Option<&Block> {
        self.by_position
            .get(&(*file_id, index))
            .and_then(|id| self.blocks.get(id))
    }

    /// Every block belonging to one file, in no particular order.
    pub fn blocks_of_file(&self, file_id: &Uuid) -> Vec<&Block> {
        self.blocks
            .values()
            .filter(|b| b.file_id == *file_id)
            .collect()
    }

    /// Blocks of `file_id` overlapping the byte range `[from, to]`.
    ///
    /// The interval is closed at both ends, so a range ending exactly on a
    /// block boundary also selects the block starting there.
    pub fn blocks_in_range(&self, file_id: &Uuid, from: u64, to: u64) -> Vec<&Block> {
        self.blocks
            .values()
            .filter(|b| {
                b.file_id == *file_id && {
                    let start = b.start_offset();
                    let end = start + BLOCK_SIZE;
                    start <= to && end >= from
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn to_archive_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.blocks.len() * BLOCK_RECORD_LEN);
        for block in self.blocks.values() {
            block.encode_record(&mut out);
        }
        out
    }

    pub fn from_archive_bytes(data: &[u8]) -> Result<Self, ArchiveError> {
        let mut store = BlockStore::new();
        for block in decode_records(data, BLOCK_RECORD_LEN, Block::decode_record)? {
            store.insert(block);
        }
        Ok(store)
    }
}
