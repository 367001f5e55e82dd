//! FUSE mount surface for secfs.
//!
//! Takes a loaded [`StorageSession`] from `secfs-core`, exposes it as a
//! mounted directory tree, and runs the background metadata flusher for
//! the lifetime of the mount.

pub mod error;
pub mod filesystem;
pub mod inode;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fuser::MountOption;
use secfs_core::session::flush::PersistenceScheduler;
use secfs_core::StorageSession;
use thiserror::Error;
use tracing::info;

pub use filesystem::SecfsFilesystem;

/// Errors from mounting or running the filesystem.
#[derive(Error, Debug)]
pub enum MountError {
    #[error("mount failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session error: {0}")]
    Session(#[from] secfs_core::SessionError),
}

/// Mount `session` at `mountpoint` and serve requests until unmounted.
///
/// Blocks the calling thread for the lifetime of the mount. The metadata
/// flusher runs alongside on `flush_interval` and is stopped, with a final
/// flush, once the filesystem is unmounted.
pub fn mount(
    session: Arc<StorageSession>,
    mountpoint: &Path,
    flush_interval: Duration,
) -> Result<(), MountError> {
    let scheduler = PersistenceScheduler::spawn(Arc::clone(&session), flush_interval);
    let fs = SecfsFilesystem::new(Arc::clone(&session));

    let options = [
        MountOption::FSName("secfs".to_string()),
        MountOption::Subtype("secfs".to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];
    info!(mountpoint = %mountpoint.display(), "mounting filesystem");
    let served = fuser::mount2(fs, mountpoint, &options);

    scheduler.stop();
    served?;
    info!("filesystem unmounted");
    Ok(())
}
