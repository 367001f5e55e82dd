//! Inode-to-path mapping.
//!
//! The engine addresses everything by absolute path; the kernel speaks
//! inode numbers. This table owns the translation. Numbers are handed out
//! on first sight of a path and stay stable until the entry is removed, so
//! the kernel can keep referring to an inode across operations.

use std::collections::HashMap;

use parking_lot::Mutex;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
struct Tables {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next: u64,
}

/// Bidirectional inode/path table, shared across request threads.
#[derive(Debug)]
pub struct InodeTable {
    tables: Mutex<Tables>,
}

impl InodeTable {
    /// A fresh table with the root pre-registered as inode 1.
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(ROOT_INODE, "/".to_string());
        by_path.insert("/".to_string(), ROOT_INODE);
        InodeTable {
            tables: Mutex::new(Tables { by_ino, by_path, next: ROOT_INODE + 1 }),
        }
    }

    /// Inode for `path`, allocating one on first sight.
    pub fn get_or_insert(&self, path: &str) -> u64 {
        let mut tables = self.tables.lock();
        if let Some(ino) = tables.by_path.get(path) {
            return *ino;
        }
        let ino = tables.next;
        tables.next += 1;
        tables.by_ino.insert(ino, path.to_string());
        tables.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Path currently bound to `ino`, if any.
    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.tables.lock().by_ino.get(&ino).cloned()
    }

    /// Forget `path` and everything below it after an unlink or rmdir.
    pub fn remove_subtree(&self, path: &str) {
        let mut tables = self.tables.lock();
        let doomed: Vec<(u64, String)> = tables
            .by_ino
            .iter()
            .filter(|(_, p)| p.as_str() == path || in_subtree(path, p))
            .map(|(ino, p)| (*ino, p.clone()))
            .collect();
        for (ino, p) in doomed {
            tables.by_ino.remove(&ino);
            tables.by_path.remove(&p);
        }
    }

    /// Rewrite the bindings for `src` and everything below it to live under
    /// `dst`, keeping every inode number for the kernel's benefit.
    pub fn retarget_subtree(&self, src: &str, dst: &str) {
        let mut tables = self.tables.lock();
        let moved: Vec<(u64, String)> = tables
            .by_ino
            .iter()
            .filter(|(_, p)| p.as_str() == src || in_subtree(src, p))
            .map(|(ino, p)| (*ino, p.clone()))
            .collect();
        for (ino, old) in moved {
            let new = format!("{dst}{}", &old[src.len()..]);
            tables.by_path.remove(&old);
            tables.by_path.insert(new.clone(), ino);
            tables.by_ino.insert(ino, new);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn in_subtree(dir: &str, path: &str) -> bool {
    path.len() > dir.len()
        && path.starts_with(dir)
        && (dir.ends_with('/') || path.as_bytes()[dir.len()] == b'/')
}

/// Absolute engine path of `name` inside the directory at `dir`.
pub fn child_path(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preregistered() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INODE).as_deref(), Some("/"));
        assert_eq!(table.get_or_insert("/"), ROOT_INODE);
    }

    #[test]
    fn inode_numbers_are_stable() {
        let table = InodeTable::new();
        let a = table.get_or_insert("/a");
        let b = table.get_or_insert("/b");
        assert_ne!(a, b);
        assert_eq!(table.get_or_insert("/a"), a);
        assert_eq!(table.path_of(a).as_deref(), Some("/a"));
    }

    #[test]
    fn remove_subtree_drops_all_bindings_below() {
        let table = InodeTable::new();
        table.get_or_insert("/d");
        let inner = table.get_or_insert("/d/inner");
        let sibling = table.get_or_insert("/db");

        table.remove_subtree("/d");
        assert!(table.path_of(inner).is_none());
        // prefix-sharing sibling survives
        assert_eq!(table.path_of(sibling).as_deref(), Some("/db"));
    }

    #[test]
    fn retarget_keeps_inode_numbers_across_a_rename() {
        let table = InodeTable::new();
        let dir = table.get_or_insert("/old");
        let file = table.get_or_insert("/old/f");

        table.retarget_subtree("/old", "/new");
        assert_eq!(table.path_of(dir).as_deref(), Some("/new"));
        assert_eq!(table.path_of(file).as_deref(), Some("/new/f"));
        assert_eq!(table.get_or_insert("/new/f"), file);
    }

    #[test]
    fn child_paths_join_cleanly_under_root() {
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
    }
}
