//! In-memory metadata stores and their on-disk archive codec.
//!
//! The path index and the block catalog are plain in-memory collections;
//! durability comes from serializing each of them wholesale into an
//! encrypted archive file (see [`record`]). Block *content* is not handled
//! here at all; it is durable immediately on write, one encrypted object
//! per block.

pub mod blocks;
pub mod index;
pub mod record;

pub use blocks::{BLOCK_SIZE, Block, BlockStore};
pub use index::{Item, ItemKind, PATH_MAX, PathIndex};
pub use record::ArchiveError;
