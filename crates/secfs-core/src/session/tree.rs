//! Subtree operations: recursive purge and rename.
//!
//! The tree is flat path strings, so a subtree is just the descendant set
//! of one prefix query. Purge and rename both work from that flattened
//! list; neither ever recurses.

use std::path::Path;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{Item, PATH_MAX};

use super::{EngineState, SessionError, io};

/// Drop every content block of one file, metadata and ciphertext objects
/// both.
pub(crate) fn purge_file_blocks(data_dir: &Path, state: &mut EngineState, file_id: &Uuid) {
    let ids: Vec<Uuid> = state
        .blocks
        .blocks_of_file(file_id)
        .iter()
        .map(|b| b.id)
        .collect();
    debug!(file = %file_id, blocks = ids.len(), "purging file blocks");
    for id in ids {
        if let Some(block) = state.blocks.remove(&id) {
            io::delete_block_object(data_dir, &block);
        }
    }
}

/// Remove an entry and, for directories, its whole subtree.
///
/// Directory removal walks the flattened descendant list: files lose their
/// blocks, every entry leaves the index. The entry itself goes last.
pub(crate) fn purge_item(data_dir: &Path, state: &mut EngineState, item: &Item) {
    if item.is_dir() {
        let descendants: Vec<Item> = state
            .index
            .descendants_of(&item.path)
            .into_iter()
            .cloned()
            .collect();
        debug!(path = %item.path, descendants = descendants.len(), "purging subtree");
        for descendant in descendants {
            if !descendant.is_dir() {
                purge_file_blocks(data_dir, state, &descendant.id);
            }
            state.index.remove(&descendant.id);
        }
    } else {
        purge_file_blocks(data_dir, state, &item.id);
    }
    state.index.remove(&item.id);
}

/// Move `src` (and its subtree, for directories) to `dst`.
///
/// An existing destination of the same kind is purged first, matching the
/// overwrite semantics of a rename syscall. All rewritten paths are
/// validated before any of them is applied, so a too-long result leaves the
/// tree untouched.
pub(crate) fn rename(
    data_dir: &Path,
    state: &mut EngineState,
    src: &str,
    dst: &str,
) -> Result<(), SessionError> {
    if src == dst {
        return Ok(());
    }

    let source = state
        .index
        .get_by_path(src)
        .cloned()
        .ok_or_else(|| SessionError::NotFound { path: src.to_string() })?;

    let dest = state.index.get_by_path(dst).cloned();
    if let Some(dest) = &dest {
        if dest.is_dir() && !source.is_dir() {
            return Err(SessionError::IsADirectory { path: dst.to_string() });
        }
        if !dest.is_dir() && source.is_dir() {
            return Err(SessionError::NotADirectory { path: dst.to_string() });
        }
    }

    // Plan and validate every path rewrite before mutating anything; the
    // destination purge below is irreversible.
    let mut moves: Vec<(Uuid, String)> = vec![(source.id, dst.to_string())];
    if source.is_dir() {
        for descendant in state.index.descendants_of(src) {
            let new_path = format!("{dst}{}", &descendant.path[src.len()..]);
            moves.push((descendant.id, new_path));
        }
    }
    for (_, new_path) in &moves {
        if new_path.len() > PATH_MAX {
            return Err(SessionError::PathTooLong { path: new_path.clone() });
        }
    }

    if let Some(dest) = &dest {
        warn!(path = %dst, "rename destination exists, purging");
        purge_item(data_dir, state, dest);
    }

    debug!(src, dst, entries = moves.len(), "renaming subtree");
    for (id, new_path) in moves {
        state.index.set_path(&id, new_path);
    }
    Ok(())
}
