//! End-to-end engine behavior against a real temporary data directory.

use secfs_core::{BLOCK_SIZE, ItemKind, StorageSession};
use tempfile::TempDir;

fn new_session(dir: &TempDir) -> StorageSession {
    StorageSession::create(&dir.path().join("data"), "correct horse battery staple").unwrap()
}

/// Deterministic non-repeating content for block-spanning tests.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn create_and_lookup() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let root = session.lookup("/").unwrap();
    assert!(root.is_dir());

    let file = session.create_file("/hello.txt").unwrap();
    assert_eq!(file.kind, ItemKind::File);
    assert_eq!(file.size, 0);
    assert_eq!(session.lookup("/hello.txt").unwrap().id, file.id);
}

#[test]
fn create_requires_an_existing_parent_directory() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    assert!(session.create_file("/missing/file").is_err());
    session.create_dir("/present").unwrap();
    session.create_file("/present/file").unwrap();
}

#[test]
fn duplicate_create_is_rejected() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    session.create_file("/f").unwrap();
    assert!(session.create_file("/f").is_err());
    assert!(session.create_dir("/f").is_err());
}

#[test]
fn single_block_round_trip() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.create_file("/f").unwrap();

    let data = pattern(1000);
    assert_eq!(session.write("/f", 0, &data).unwrap(), 1000);
    assert_eq!(session.lookup("/f").unwrap().size, 1000);
    assert_eq!(session.read("/f", 0, 1000).unwrap(), data);
}

#[test]
fn round_trip_across_a_block_boundary() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.create_file("/f").unwrap();

    let offset = BLOCK_SIZE - 100;
    let data = pattern(300);
    session.write("/f", offset, &data).unwrap();

    assert_eq!(session.lookup("/f").unwrap().size, offset + 300);
    assert_eq!(session.read("/f", offset, 300).unwrap(), data);
    // the two halves individually
    assert_eq!(session.read("/f", offset, 100).unwrap(), data[..100]);
    assert_eq!(session.read("/f", BLOCK_SIZE, 200).unwrap(), data[100..]);
}

#[test]
fn one_mebibyte_plus_ten_bytes_spans_three_blocks() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    let file = session.create_file("/big").unwrap();

    let data = pattern(1_048_586);
    session.write("/big", 0, &data).unwrap();

    assert_eq!(session.lookup("/big").unwrap().size, 1_048_586);
    let tail = session.read("/big", 1_048_576, 10).unwrap();
    assert_eq!(tail, data[1_048_576..]);

    // metadata survives a flush and carries exactly blocks 0, 1, 2
    session.flush().unwrap();
    drop(session);
    let key = reopen_key(&dir);
    let session = StorageSession::load(&dir.path().join("data"), key).unwrap();
    assert_eq!(session.lookup("/big").unwrap().id, file.id);
    assert_eq!(session.read("/big", 1_048_576, 10).unwrap(), data[1_048_576..]);
}

fn reopen_key(dir: &TempDir) -> secfs_core::MasterKey {
    let iv = StorageSession::read_dataset_iv(&dir.path().join("data")).unwrap();
    secfs_core::MasterKey::derive("correct horse battery staple", &iv)
}

#[test]
fn sparse_regions_and_past_eof_read_as_zeros() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.create_file("/sparse").unwrap();

    // write only into block 2, leaving blocks 0 and 1 unbacked
    let offset = 2 * BLOCK_SIZE + 7;
    session.write("/sparse", offset, b"payload").unwrap();

    let hole = session.read("/sparse", BLOCK_SIZE, 64).unwrap();
    assert_eq!(hole, vec![0u8; 64]);

    // a read crossing the logical end comes back zero-padded to full length
    let size = session.lookup("/sparse").unwrap().size;
    let past = session.read("/sparse", size - 3, 10).unwrap();
    assert_eq!(past.len(), 10);
    assert_eq!(&past[..3], b"oad");
    assert_eq!(&past[3..], &[0u8; 7]);
}

#[test]
fn overwrite_within_a_block_preserves_surrounding_bytes() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.create_file("/f").unwrap();

    session.write("/f", 0, &[0xAA; 100]).unwrap();
    session.write("/f", 40, &[0xBB; 20]).unwrap();

    let data = session.read("/f", 0, 100).unwrap();
    assert_eq!(&data[..40], &[0xAA; 40]);
    assert_eq!(&data[40..60], &[0xBB; 20]);
    assert_eq!(&data[60..], &[0xAA; 40]);
    assert_eq!(session.lookup("/f").unwrap().size, 100);
}

#[test]
fn listing_returns_exactly_the_direct_children() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    session.create_dir("/a").unwrap();
    session.create_dir("/a/b").unwrap();
    session.create_file("/a/b/c").unwrap();
    session.create_file("/a.txt").unwrap();

    let names: Vec<String> = session
        .list_dir("/a")
        .unwrap()
        .into_iter()
        .map(|i| i.path)
        .collect();
    assert_eq!(names, vec!["/a/b"]);

    let root: Vec<String> = session
        .list_dir("/")
        .unwrap()
        .into_iter()
        .map(|i| i.path)
        .collect();
    assert_eq!(root, vec!["/a", "/a.txt"]);
}

#[test]
fn listing_a_file_fails() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.create_file("/f").unwrap();
    assert!(session.list_dir("/f").is_err());
    assert!(session.list_dir("/nope").is_err());
}

#[test]
fn remove_purges_a_whole_subtree_and_its_block_objects() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let session = StorageSession::create(&data_dir, "pw-for-purge").unwrap();

    session.create_dir("/d").unwrap();
    session.create_dir("/d/sub").unwrap();
    session.create_file("/d/sub/f1").unwrap();
    session.create_file("/d/f2").unwrap();
    session.write("/d/sub/f1", 0, &pattern(2000)).unwrap();
    session.write("/d/f2", 0, &pattern(100)).unwrap();

    session.remove("/d").unwrap();

    assert!(session.lookup("/d").is_err());
    assert!(session.lookup("/d/sub").is_err());
    assert!(session.lookup("/d/sub/f1").is_err());
    assert!(session.lookup("/d/f2").is_err());

    // no stray block objects left in the data directory
    let leftovers: Vec<_> = std::fs::read_dir(&data_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| !name.starts_with(".secfs"))
        .collect();
    assert!(leftovers.is_empty(), "stray block objects: {leftovers:?}");
}

#[test]
fn rename_moves_a_subtree() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    session.create_dir("/old").unwrap();
    session.create_dir("/old/inner").unwrap();
    session.create_file("/old/inner/f").unwrap();
    session.write("/old/inner/f", 0, b"contents").unwrap();

    session.rename("/old", "/new").unwrap();

    assert!(session.lookup("/old").is_err());
    assert!(session.lookup("/old/inner/f").is_err());
    assert!(session.lookup("/new/inner").unwrap().is_dir());
    assert_eq!(session.read("/new/inner/f", 0, 8).unwrap(), b"contents");
}

#[test]
fn rename_does_not_capture_sibling_prefix_matches() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    session.create_dir("/a").unwrap();
    session.create_file("/a/x").unwrap();
    session.create_file("/ab").unwrap();

    session.rename("/a", "/moved").unwrap();

    assert!(session.lookup("/moved/x").is_ok());
    // "/ab" only shares a string prefix and must stay put
    assert!(session.lookup("/ab").is_ok());
}

#[test]
fn rename_rejects_kind_conflicts_without_mutating() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    session.create_dir("/d").unwrap();
    session.create_file("/f").unwrap();

    assert!(session.rename("/f", "/d").is_err());
    assert!(session.rename("/d", "/f").is_err());
    assert!(session.lookup("/f").is_ok());
    assert!(session.lookup("/d").is_ok());
}

#[test]
fn failed_rename_leaves_the_destination_subtree_intact() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    // a descendant whose rewritten path would exceed the limit
    session.create_dir("/s").unwrap();
    let deep = format!("/s/{}", "x".repeat(505));
    session.create_file(&deep).unwrap();

    session.create_dir("/toolong").unwrap();
    session.create_file("/toolong/keep").unwrap();
    session.write("/toolong/keep", 0, b"survivor").unwrap();

    let result = session.rename("/s", "/toolong");
    assert!(matches!(
        result,
        Err(secfs_core::SessionError::PathTooLong { .. })
    ));

    // neither side was mutated by the failed rename
    assert!(session.lookup("/s").is_ok());
    assert!(session.lookup(&deep).is_ok());
    assert!(session.lookup("/toolong/keep").is_ok());
    assert_eq!(session.read("/toolong/keep", 0, 8).unwrap(), b"survivor");
}

#[test]
fn rename_overwrites_a_same_kind_destination() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    session.create_file("/src").unwrap();
    session.write("/src", 0, b"fresh").unwrap();
    session.create_file("/dst").unwrap();
    session.write("/dst", 0, b"stale-stale").unwrap();

    session.rename("/src", "/dst").unwrap();

    assert!(session.lookup("/src").is_err());
    let dst = session.lookup("/dst").unwrap();
    assert_eq!(dst.size, 5);
    assert_eq!(session.read("/dst", 0, 5).unwrap(), b"fresh");
}

#[test]
fn rename_to_itself_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    session.create_file("/f").unwrap();
    session.write("/f", 0, b"kept").unwrap();
    session.rename("/f", "/f").unwrap();
    assert_eq!(session.read("/f", 0, 4).unwrap(), b"kept");
}

#[test]
fn truncate_only_moves_the_logical_size() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.create_file("/f").unwrap();
    session.write("/f", 0, &pattern(500)).unwrap();

    session.truncate("/f", 100).unwrap();
    assert_eq!(session.lookup("/f").unwrap().size, 100);

    // growing again exposes the old bytes; blocks were never discarded
    session.truncate("/f", 500).unwrap();
    assert_eq!(session.read("/f", 0, 500).unwrap(), pattern(500));
}

#[test]
fn shrunk_files_read_as_zeros_past_the_logical_size() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    session.create_file("/f").unwrap();
    session.write("/f", 0, &[0xAB; 500]).unwrap();

    session.truncate("/f", 100).unwrap();

    // the backing block still holds all 500 bytes, but only the first 100
    // are inside the file; nothing stale may leak past the logical size
    let data = session.read("/f", 0, 500).unwrap();
    assert_eq!(&data[..100], &[0xAB; 100]);
    assert_eq!(&data[100..], &[0u8; 400]);

    // same for a read starting beyond the new size
    assert_eq!(session.read("/f", 200, 50).unwrap(), vec![0u8; 50]);
}

#[test]
fn open_with_truncate_discards_content_and_identity() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);

    let original = session.create_file("/f").unwrap();
    session.write("/f", 0, &pattern(3000)).unwrap();

    let reopened = session.open("/f", true).unwrap();
    assert_ne!(reopened.id, original.id);
    assert_eq!(reopened.size, 0);
    assert_eq!(session.read("/f", 0, 16).unwrap(), vec![0u8; 16]);

    // plain open keeps the entry as-is
    let plain = session.open("/f", false).unwrap();
    assert_eq!(plain.id, reopened.id);
}

#[test]
fn operations_mark_the_session_dirty() {
    let dir = TempDir::new().unwrap();
    let session = new_session(&dir);
    assert!(!session.is_dirty());

    session.create_file("/f").unwrap();
    assert!(session.is_dirty());
    session.flush().unwrap();
    assert!(!session.is_dirty());

    session.write("/f", 0, b"x").unwrap();
    assert!(session.is_dirty());
}
