//! The path index: every file and directory in a dataset.
//!
//! Items carry absolute paths (root is `"/"`, no trailing separator
//! otherwise), so the directory tree is encoded entirely in the flat path
//! strings. Subtree queries are prefix queries; there is no parent/child
//! linkage to maintain.

use std::collections::HashMap;

use uuid::Uuid;

use super::record::{ArchiveError, decode_records};

/// Maximum path length in bytes, fixed by the archive record layout.
pub const PATH_MAX: usize = 512;

/// Serialized length of one [`Item`]: id (16) + kind (1) + size (8) +
/// path length (2) + path bytes padded to [`PATH_MAX`].
pub const ITEM_RECORD_LEN: usize = 16 + 1 + 8 + 2 + PATH_MAX;

/// Whether an [`Item`] is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Directory,
}

impl ItemKind {
    fn to_byte(self) -> u8 {
        match self {
            ItemKind::File => 0,
            ItemKind::Directory => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, ArchiveError> {
        match byte {
            0 => Ok(ItemKind::File),
            1 => Ok(ItemKind::Directory),
            other => Err(ArchiveError::InvalidRecord(format!(
                "unknown item kind byte {other:#04x}"
            ))),
        }
    }
}

/// One filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Opaque identity, assigned at creation, never reused or changed.
    pub id: Uuid,
    pub kind: ItemKind,
    /// Absolute path; unique across the index.
    pub path: String,
    /// Logical byte length; meaningful for files only.
    pub size: u64,
}

impl Item {
    /// Create a fresh entry with a random identity and zero size.
    pub fn new(kind: ItemKind, path: impl Into<String>) -> Self {
        Item {
            id: Uuid::new_v4(),
            kind,
            path: path.into(),
            size: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ItemKind::Directory
    }

    pub(crate) fn encode_record(&self, out: &mut Vec<u8>) -> Result<(), ArchiveError> {
        let path = self.path.as_bytes();
        if path.len() > PATH_MAX {
            return Err(ArchiveError::InvalidRecord(format!(
                "path exceeds {PATH_MAX} bytes: {}",
                self.path
            )));
        }
        out.extend_from_slice(self.id.as_bytes());
        out.push(self.kind.to_byte());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(path);
        out.resize(out.len() + (PATH_MAX - path.len()), 0);
        Ok(())
    }

    pub(crate) fn decode_record(buf: &[u8]) -> Result<Self, ArchiveError> {
        debug_assert_eq!(buf.len(), ITEM_RECORD_LEN);
        let id = Uuid::from_slice(&buf[0..16])
            .map_err(|e| ArchiveError::InvalidRecord(e.to_string()))?;
        let kind = ItemKind::from_byte(buf[16])?;
        let size = u64::from_be_bytes(buf[17..25].try_into().expect("8-byte slice"));
        let path_len = u16::from_be_bytes(buf[25..27].try_into().expect("2-byte slice")) as usize;
        if path_len > PATH_MAX {
            return Err(ArchiveError::InvalidRecord(format!(
                "declared path length {path_len} exceeds {PATH_MAX}"
            )));
        }
        let path = std::str::from_utf8(&buf[27..27 + path_len])
            .map_err(|e| ArchiveError::InvalidRecord(format!("path is not UTF-8: {e}")))?
            .to_string();
        Ok(Item { id, kind, path, size })
    }
}

/// Returns true if `path` lies strictly inside the subtree rooted at `dir`.
///
/// The test is exclusive and separator-aligned: the candidate must be
/// strictly longer than `dir`, start with it, and continue with a `/`
/// (trivially satisfied under root, whose path already ends with one). A
/// directory is never a descendant of itself, so subtree walks never
/// double-process their root.
pub(crate) fn is_descendant(dir: &str, path: &str) -> bool {
    path.len() > dir.len()
        && path.starts_with(dir)
        && (dir.ends_with('/') || path.as_bytes()[dir.len()] == b'/')
}

/// Suffix of `path` below `dir`, without the leading separator, or `None`
/// if `path` is not a descendant of `dir`.
fn subtree_suffix<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    if !is_descendant(dir, path) {
        return None;
    }
    let rest = &path[dir.len()..];
    Some(rest.strip_prefix('/').unwrap_or(rest))
}

/// The set of all [`Item`]s, queryable by identity and by path.
///
/// Lookups are O(1) via two secondary maps; both are kept consistent by
/// funnelling every path and size change through [`PathIndex::set_path`] /
/// [`PathIndex::set_size`].
#[derive(Debug, Default)]
pub struct PathIndex {
    items: HashMap<Uuid, Item>,
    by_path: HashMap<String, Uuid>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. The caller is responsible for path uniqueness; an
    /// insert over an existing path replaces the mapping.
    pub fn insert(&mut self, item: Item) {
        self.by_path.insert(item.path.clone(), item.id);
        self.items.insert(item.id, item);
    }

    /// Remove by identity. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &Uuid) -> Option<Item> {
        let item = self.items.remove(id)?;
        self.by_path.remove(&item.path);
        Some(item)
    }

    pub fn get(&self, id: &Uuid) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&Item> {
        self.by_path.get(path).and_then(|id| self.items.get(id))
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Re-point an entry at a new path, keeping the path map consistent.
    /// Returns false if the id is unknown.
    pub fn set_path(&mut self, id: &Uuid, new_path: String) -> bool {
        let Some(item) = self.items.get_mut(id) else {
            return false;
        };
        self.by_path.remove(&item.path);
        self.by_path.insert(new_path.clone(), *id);
        item.path = new_path;
        true
    }

    /// Update an entry's logical size. Returns false if the id is unknown.
    pub fn set_size(&mut self, id: &Uuid, size: u64) -> bool {
        match self.items.get_mut(id) {
            Some(item) => {
                item.size = size;
                true
            }
            None => false,
        }
    }

    /// Direct children of `dir`: descendants whose remaining suffix holds
    /// no further separator, except possibly as its final character. The
    /// directory itself never appears in its own listing.
    pub fn children_of(&self, dir: &str) -> Vec<&Item> {
        self.items
            .values()
            .filter(|item| {
                subtree_suffix(dir, &item.path).is_some_and(|suffix| {
                    !suffix.is_empty()
                        && match suffix.find('/') {
                            None => true,
                            Some(at) => at == suffix.len() - 1,
                        }
                })
            })
            .collect()
    }

    /// Every entry strictly inside the subtree rooted at `dir`, flattened.
    /// Paths already encode nesting, so callers never need to recurse.
    pub fn descendants_of(&self, dir: &str) -> Vec<&Item> {
        self.items
            .values()
            .filter(|item| is_descendant(dir, &item.path))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Serialize every entry as concatenated fixed-size records.
    pub fn to_archive_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut out = Vec::with_capacity(self.items.len() * ITEM_RECORD_LEN);
        for item in self.items.values() {
            item.encode_record(&mut out)?;
        }
        Ok(out)
    }

    /// Rebuild an index from archive plaintext.
    pub fn from_archive_bytes(data: &[u8]) -> Result<Self, ArchiveError> {
        let mut index = PathIndex::new();
        for item in decode_records(data, ITEM_RECORD_LEN, Item::decode_record)? {
            index.insert(item);
        }
        Ok(index)
    }
}
