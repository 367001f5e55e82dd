//! The storage session: a loaded dataset and every operation on it.
//!
//! A dataset is one data directory holding the encrypted path index
//! (`.secfs`), the encrypted block catalog (`.secfs_blocks`), the dataset
//! IV (`.secfs.iv`), its encrypted self-check copy (`.secfs.iv.enc`), and
//! one ciphertext object per content block, named by block id.
//!
//! All in-memory metadata sits behind one coarse mutex. Every operation
//! takes it for its full duration, including the read-decrypt-modify-
//! encrypt-write cycle of content I/O, so concurrent callers never observe
//! a half-applied mutation. Block content is durable immediately on write;
//! metadata only at the next [`StorageSession::flush`], normally driven by
//! the [`flush::PersistenceScheduler`].

pub mod flush;
pub(crate) mod io;
pub(crate) mod tree;

pub use flush::PersistenceScheduler;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::crypto::{self, CryptoError, IV_LEN, MasterKey};
use crate::store::{ArchiveError, BlockStore, Item, ItemKind, PATH_MAX, PathIndex};

/// Encrypted path index archive, relative to the data directory.
const INDEX_ARCHIVE: &str = ".secfs";
/// Encrypted block catalog archive.
const BLOCKS_ARCHIVE: &str = ".secfs_blocks";
/// Plaintext dataset IV, doubling as the key-derivation salt.
const IV_FILE: &str = ".secfs.iv";
/// The dataset IV encrypted under the dataset key, used as a password check.
const KEY_CHECK_FILE: &str = ".secfs.iv.enc";

/// Path of the root directory entry.
pub const ROOT_PATH: &str = "/";

/// Errors surfaced by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no such entry: {path}")]
    NotFound { path: String },

    #[error("entry already exists: {path}")]
    AlreadyExists { path: String },

    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// The path is not absolute or is otherwise malformed.
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("path too long: {path}")]
    PathTooLong { path: String },

    /// The supplied password does not match the dataset.
    #[error("key verification failed")]
    WrongKey,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// The mutable metadata of a loaded dataset, guarded as one unit.
pub(crate) struct EngineState {
    pub(crate) index: PathIndex,
    pub(crate) blocks: BlockStore,
}

/// A loaded (or freshly created) dataset and its key material.
///
/// Owns everything an operation needs; there is no process-global state.
/// Shared with the background flusher behind an `Arc`.
pub struct StorageSession {
    data_dir: PathBuf,
    key: MasterKey,
    dataset_iv: [u8; IV_LEN],
    state: Mutex<EngineState>,
    dirty: AtomicBool,
}

impl StorageSession {
    /// Whether `data_dir` already holds a complete dataset.
    pub fn exists(data_dir: &Path) -> bool {
        [INDEX_ARCHIVE, BLOCKS_ARCHIVE, IV_FILE, KEY_CHECK_FILE]
            .iter()
            .all(|name| data_dir.join(name).is_file())
    }

    /// Read the dataset IV, needed to derive the key before loading.
    pub fn read_dataset_iv(data_dir: &Path) -> Result<[u8; IV_LEN], SessionError> {
        let bytes = fs::read(data_dir.join(IV_FILE))?;
        let iv: [u8; IV_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| CryptoError::InvalidIvLength { actual: b.len() })?;
        Ok(iv)
    }

    /// Check a derived key against the dataset's encrypted self-check file.
    ///
    /// The check re-encrypts the IV under the candidate key and compares it
    /// with the stored ciphertext over their common prefix.
    pub fn verify_key(
        data_dir: &Path,
        key: &MasterKey,
        dataset_iv: &[u8; IV_LEN],
    ) -> Result<bool, SessionError> {
        let stored = fs::read(data_dir.join(KEY_CHECK_FILE))?;
        let expected = crypto::encrypt(dataset_iv, key, dataset_iv)?;
        let common = stored.len().min(expected.len());
        Ok(common > 0 && stored[..common] == expected[..common])
    }

    /// Bootstrap a brand new dataset in `data_dir`.
    ///
    /// Generates the dataset IV, derives the key from `password`, writes
    /// the IV and self-check files, creates the root directory entry, and
    /// performs the initial metadata flush.
    #[instrument(level = "info", skip(password))]
    pub fn create(data_dir: &Path, password: &str) -> Result<Self, SessionError> {
        fs::create_dir_all(data_dir)?;

        let dataset_iv = crypto::random_iv();
        fs::write(data_dir.join(IV_FILE), dataset_iv)?;

        let key = MasterKey::derive(password, &dataset_iv);
        let check = crypto::encrypt(&dataset_iv, &key, &dataset_iv)?;
        fs::write(data_dir.join(KEY_CHECK_FILE), check)?;

        let mut index = PathIndex::new();
        index.insert(Item::new(ItemKind::Directory, ROOT_PATH));

        let session = StorageSession {
            data_dir: data_dir.to_path_buf(),
            key,
            dataset_iv,
            state: Mutex::new(EngineState {
                index,
                blocks: BlockStore::new(),
            }),
            dirty: AtomicBool::new(false),
        };
        session.flush()?;
        info!(data_dir = %data_dir.display(), "created dataset");
        Ok(session)
    }

    /// Load an existing dataset with an already verified key.
    #[instrument(level = "info", skip(key))]
    pub fn load(data_dir: &Path, key: MasterKey) -> Result<Self, SessionError> {
        let dataset_iv = Self::read_dataset_iv(data_dir)?;
        if !Self::verify_key(data_dir, &key, &dataset_iv)? {
            return Err(SessionError::WrongKey);
        }

        let index_bytes =
            crate::store::record::read_archive(&data_dir.join(INDEX_ARCHIVE), &key, &dataset_iv)?;
        let blocks_bytes =
            crate::store::record::read_archive(&data_dir.join(BLOCKS_ARCHIVE), &key, &dataset_iv)?;

        let index = PathIndex::from_archive_bytes(&index_bytes)?;
        let blocks = BlockStore::from_archive_bytes(&blocks_bytes)?;
        info!(
            data_dir = %data_dir.display(),
            items = index.len(),
            blocks = blocks.len(),
            "loaded dataset"
        );

        Ok(StorageSession {
            data_dir: data_dir.to_path_buf(),
            key,
            dataset_iv,
            state: Mutex::new(EngineState { index, blocks }),
            dirty: AtomicBool::new(false),
        })
    }

    /// Entry at `path`, cloned out of the index.
    pub fn lookup(&self, path: &str) -> Result<Item, SessionError> {
        validate_path(path)?;
        let state = self.state.lock();
        state
            .index
            .get_by_path(path)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { path: path.to_string() })
    }

    /// Direct children of a directory, sorted by path so listings are
    /// stable across calls.
    pub fn list_dir(&self, path: &str) -> Result<Vec<Item>, SessionError> {
        validate_path(path)?;
        let state = self.state.lock();
        let dir = state
            .index
            .get_by_path(path)
            .ok_or_else(|| SessionError::NotFound { path: path.to_string() })?;
        if !dir.is_dir() {
            return Err(SessionError::NotADirectory { path: path.to_string() });
        }
        let mut children: Vec<Item> = state.index.children_of(path).into_iter().cloned().collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn create_file(&self, path: &str) -> Result<Item, SessionError> {
        self.create_item(ItemKind::File, path)
    }

    #[instrument(level = "debug", skip(self))]
    pub fn create_dir(&self, path: &str) -> Result<Item, SessionError> {
        self.create_item(ItemKind::Directory, path)
    }

    fn create_item(&self, kind: ItemKind, path: &str) -> Result<Item, SessionError> {
        validate_path(path)?;
        let mut state = self.state.lock();
        if state.index.contains_path(path) {
            return Err(SessionError::AlreadyExists { path: path.to_string() });
        }
        let parent = parent_path(path)
            .ok_or_else(|| SessionError::InvalidPath { path: path.to_string() })?;
        match state.index.get_by_path(parent) {
            Some(item) if item.is_dir() => {}
            Some(_) => {
                return Err(SessionError::NotADirectory { path: parent.to_string() });
            }
            None => return Err(SessionError::NotFound { path: parent.to_string() }),
        }

        let item = Item::new(kind, path);
        state.index.insert(item.clone());
        self.mark_dirty();
        Ok(item)
    }

    /// Open an existing file, optionally truncating it.
    ///
    /// Truncate-on-open discards the old entry entirely (blocks included)
    /// and recreates it under a fresh identity at the same path.
    #[instrument(level = "debug", skip(self))]
    pub fn open(&self, path: &str, truncate: bool) -> Result<Item, SessionError> {
        validate_path(path)?;
        let mut state = self.state.lock();
        let item = state
            .index
            .get_by_path(path)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { path: path.to_string() })?;
        if item.is_dir() {
            return Err(SessionError::IsADirectory { path: path.to_string() });
        }
        if !truncate {
            return Ok(item);
        }

        debug!(path, "truncating on open");
        tree::purge_item(&self.data_dir, &mut state, &item);
        let fresh = Item::new(ItemKind::File, path);
        state.index.insert(fresh.clone());
        self.mark_dirty();
        Ok(fresh)
    }

    /// Read `len` bytes at `offset`. Always returns exactly `len` bytes;
    /// holes and the region past the logical size read as zeros.
    #[instrument(level = "debug", skip(self))]
    pub fn read(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, SessionError> {
        validate_path(path)?;
        let state = self.state.lock();
        let item = state
            .index
            .get_by_path(path)
            .ok_or_else(|| SessionError::NotFound { path: path.to_string() })?;
        if item.is_dir() {
            return Err(SessionError::IsADirectory { path: path.to_string() });
        }
        io::read_range(&self.data_dir, &self.key, &state, &item.id, item.size, offset, len)
    }

    /// Write `data` at `offset`, growing the logical size if the write
    /// extends past it. Reports the full length written even when a block
    /// fails to persist; see [`io::write_range`].
    #[instrument(level = "debug", skip(self, data), fields(len = data.len()))]
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize, SessionError> {
        validate_path(path)?;
        let mut state = self.state.lock();
        let item = state
            .index
            .get_by_path(path)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { path: path.to_string() })?;
        if item.is_dir() {
            return Err(SessionError::IsADirectory { path: path.to_string() });
        }

        let written = io::write_range(&self.data_dir, &self.key, &mut state, &item.id, offset, data);
        let new_size = item.size.max(offset + data.len() as u64);
        state.index.set_size(&item.id, new_size);
        self.mark_dirty();
        Ok(written)
    }

    /// Set a file's logical size. Content blocks are left alone; a shrink
    /// only moves the logical end, it never discards ciphertext.
    #[instrument(level = "debug", skip(self))]
    pub fn truncate(&self, path: &str, size: u64) -> Result<(), SessionError> {
        validate_path(path)?;
        let mut state = self.state.lock();
        let item = state
            .index
            .get_by_path(path)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { path: path.to_string() })?;
        if item.is_dir() {
            return Err(SessionError::IsADirectory { path: path.to_string() });
        }
        state.index.set_size(&item.id, size);
        self.mark_dirty();
        Ok(())
    }

    /// Remove an entry. Directories take their whole subtree with them;
    /// files lose all their content blocks. Serves unlink and rmdir both.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&self, path: &str) -> Result<(), SessionError> {
        validate_path(path)?;
        let mut state = self.state.lock();
        let item = state
            .index
            .get_by_path(path)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { path: path.to_string() })?;
        tree::purge_item(&self.data_dir, &mut state, &item);
        self.mark_dirty();
        Ok(())
    }

    /// Move an entry (and its subtree) to a new path, overwriting a
    /// same-kind destination.
    #[instrument(level = "debug", skip(self))]
    pub fn rename(&self, src: &str, dst: &str) -> Result<(), SessionError> {
        validate_path(src)?;
        validate_path(dst)?;
        let mut state = self.state.lock();
        tree::rename(&self.data_dir, &mut state, src, dst)?;
        self.mark_dirty();
        Ok(())
    }

    /// Serialize and persist both metadata archives.
    ///
    /// The dirty flag is cleared only after both writes succeed, and while
    /// still holding the state lock, so a mutation racing this flush leaves
    /// the flag raised for the next cycle.
    #[instrument(level = "debug", skip(self))]
    pub fn flush(&self) -> Result<(), SessionError> {
        let state = self.state.lock();
        let index_bytes = state.index.to_archive_bytes()?;
        crate::store::record::write_archive(
            &self.data_dir.join(INDEX_ARCHIVE),
            &index_bytes,
            &self.key,
            &self.dataset_iv,
        )?;
        let blocks_bytes = state.blocks.to_archive_bytes();
        crate::store::record::write_archive(
            &self.data_dir.join(BLOCKS_ARCHIVE),
            &blocks_bytes,
            &self.key,
            &self.dataset_iv,
        )?;
        self.dirty.store(false, Ordering::SeqCst);
        debug!(items = state.index.len(), blocks = state.blocks.len(), "flushed metadata");
        Ok(())
    }

    /// Whether metadata has changed since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Directory holding the dataset's archives and block objects.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Total logical bytes and entry count, for filesystem statistics.
    pub fn usage(&self) -> (u64, u64) {
        let state = self.state.lock();
        let bytes = state.index.iter().map(|i| i.size).sum();
        (bytes, state.index.len() as u64)
    }
}

impl std::fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSession")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

fn validate_path(path: &str) -> Result<(), SessionError> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(SessionError::InvalidPath { path: path.to_string() });
    }
    if path.len() > PATH_MAX {
        return Err(SessionError::PathTooLong { path: path.to_string() });
    }
    Ok(())
}

/// Parent of an absolute path, or `None` for the root itself.
fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(at) => Some(&path[..at]),
        None => None,
    }
}
