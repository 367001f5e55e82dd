//! Dataset lifecycle: creation, key verification, reload, corruption, and
//! the background flusher.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secfs_core::session::flush::PersistenceScheduler;
use secfs_core::{MasterKey, StorageSession};
use tempfile::TempDir;

const PASSWORD: &str = "a-long-enough-password";

fn derive_key(data_dir: &Path, password: &str) -> MasterKey {
    let iv = StorageSession::read_dataset_iv(data_dir).unwrap();
    MasterKey::derive(password, &iv)
}

#[test]
fn fresh_dataset_has_a_root_and_the_expected_files() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    assert!(!StorageSession::exists(&data_dir));

    let session = StorageSession::create(&data_dir, PASSWORD).unwrap();
    assert!(StorageSession::exists(&data_dir));
    assert!(session.lookup("/").unwrap().is_dir());

    for name in [".secfs", ".secfs_blocks", ".secfs.iv", ".secfs.iv.enc"] {
        assert!(data_dir.join(name).is_file(), "missing {name}");
    }
}

#[test]
fn key_verification_accepts_the_right_password_only() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    StorageSession::create(&data_dir, PASSWORD).unwrap();

    let iv = StorageSession::read_dataset_iv(&data_dir).unwrap();
    let good = MasterKey::derive(PASSWORD, &iv);
    let bad = MasterKey::derive("not the password", &iv);

    assert!(StorageSession::verify_key(&data_dir, &good, &iv).unwrap());
    assert!(!StorageSession::verify_key(&data_dir, &bad, &iv).unwrap());
}

#[test]
fn load_rejects_a_wrong_key() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    StorageSession::create(&data_dir, PASSWORD).unwrap();

    let bad = derive_key(&data_dir, "wrong");
    assert!(StorageSession::load(&data_dir, bad).is_err());
}

#[test]
fn reload_restores_every_item_and_block_field() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");

    let session = StorageSession::create(&data_dir, PASSWORD).unwrap();
    session.create_dir("/docs").unwrap();
    let file = session.create_file("/docs/report").unwrap();
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
    session.write("/docs/report", 0, &content).unwrap();
    session.flush().unwrap();
    drop(session);

    let session = StorageSession::load(&data_dir, derive_key(&data_dir, PASSWORD)).unwrap();
    let reloaded = session.lookup("/docs/report").unwrap();
    assert_eq!(reloaded.id, file.id);
    assert_eq!(reloaded.size, 10_000);
    assert!(session.lookup("/docs").unwrap().is_dir());
    assert_eq!(session.read("/docs/report", 0, 10_000).unwrap(), content);
}

#[test]
fn unflushed_metadata_is_lost_but_the_last_flush_survives() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");

    let session = StorageSession::create(&data_dir, PASSWORD).unwrap();
    session.create_file("/flushed").unwrap();
    session.flush().unwrap();
    session.create_file("/not-flushed").unwrap();
    drop(session);

    let session = StorageSession::load(&data_dir, derive_key(&data_dir, PASSWORD)).unwrap();
    assert!(session.lookup("/flushed").is_ok());
    assert!(session.lookup("/not-flushed").is_err());
}

#[test]
fn a_truncated_archive_is_detected_at_load() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");

    let session = StorageSession::create(&data_dir, PASSWORD).unwrap();
    session.create_file("/f").unwrap();
    session.flush().unwrap();
    drop(session);

    // re-encrypt garbage whose plaintext length is not a record multiple
    let iv = StorageSession::read_dataset_iv(&data_dir).unwrap();
    let key = MasterKey::derive(PASSWORD, &iv);
    let garbage = secfs_core::crypto::encrypt(&[0u8; 123], &key, &iv).unwrap();
    std::fs::write(data_dir.join(".secfs"), garbage).unwrap();

    assert!(StorageSession::load(&data_dir, key).is_err());
}

#[test]
fn scheduler_flushes_dirty_metadata_on_its_own() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");

    let session = Arc::new(StorageSession::create(&data_dir, PASSWORD).unwrap());
    let scheduler = PersistenceScheduler::spawn(Arc::clone(&session), Duration::from_millis(50));

    session.create_file("/background").unwrap();
    assert!(session.is_dirty());

    // give the flush thread a few ticks
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while session.is_dirty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!session.is_dirty(), "scheduler never flushed");
    scheduler.stop();

    let reloaded = StorageSession::load(&data_dir, derive_key(&data_dir, PASSWORD)).unwrap();
    assert!(reloaded.lookup("/background").is_ok());
}

#[test]
fn scheduler_stop_performs_a_final_flush() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");

    let session = Arc::new(StorageSession::create(&data_dir, PASSWORD).unwrap());
    // interval far beyond the test's lifetime so only stop() can flush
    let scheduler = PersistenceScheduler::spawn(Arc::clone(&session), Duration::from_secs(3600));

    session.create_file("/at-shutdown").unwrap();
    scheduler.stop();
    assert!(!session.is_dirty());

    drop(session);
    let reloaded = StorageSession::load(&data_dir, derive_key(&data_dir, PASSWORD)).unwrap();
    assert!(reloaded.lookup("/at-shutdown").is_ok());
}
