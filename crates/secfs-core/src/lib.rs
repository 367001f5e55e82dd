//! Core storage engine for secfs.
//!
//! A secfs dataset is a flat directory of individually encrypted 512 KiB
//! content blocks plus two encrypted metadata archives: a path index (every
//! file and directory, keyed by identity and by absolute path) and a block
//! catalog (which block belongs to which file at which position). All of it
//! is protected by a single password-derived master key.
//!
//! The mountable surface lives in `secfs-fuse`; this crate owns the engine:
//! the in-memory indexes, the byte-range-to-block mapping behind read and
//! write, subtree purge and rename, and the background metadata flusher.

pub mod crypto;
pub mod session;
pub mod store;

pub use crypto::MasterKey;
pub use session::{PersistenceScheduler, SessionError, StorageSession};
pub use store::blocks::BLOCK_SIZE;
pub use store::index::{Item, ItemKind};
