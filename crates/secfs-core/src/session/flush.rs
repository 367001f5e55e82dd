//! Periodic metadata persistence.
//!
//! Foreground operations only raise a dirty flag; this module owns the
//! background thread that turns the flag into an actual archive flush.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::StorageSession;

/// Background thread that flushes session metadata on a fixed interval.
///
/// Each tick flushes only if the session is dirty. Stopping wakes the
/// thread immediately, joins it, and performs one final flush so no
/// metadata is left behind on a clean shutdown.
pub struct PersistenceScheduler {
    session: Arc<StorageSession>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl PersistenceScheduler {
    /// Start the flush thread with the given tick interval.
    pub fn spawn(session: Arc<StorageSession>, interval: Duration) -> Self {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let handle = {
            let session = Arc::clone(&session);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("secfs-flush".to_string())
                .spawn(move || run(&session, &shutdown, interval))
                .expect("spawning the flush thread")
        };
        PersistenceScheduler {
            session,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the thread and flush any remaining dirty metadata.
    pub fn stop(mut self) {
        self.shut_down();
    }

    fn shut_down(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let (stopped, waker) = &*self.shutdown;
            *stopped.lock() = true;
            waker.notify_all();
        }
        if handle.join().is_err() {
            warn!("flush thread panicked");
        }
        if self.session.is_dirty() {
            if let Err(e) = self.session.flush() {
                warn!(error = %e, "final metadata flush failed");
            }
        }
    }
}

impl Drop for PersistenceScheduler {
    fn drop(&mut self) {
        self.shut_down();
    }
}

fn run(session: &StorageSession, shutdown: &(Mutex<bool>, Condvar), interval: Duration) {
    debug!(interval_secs = interval.as_secs_f64(), "flush thread started");
    let (stopped, waker) = shutdown;
    loop {
        {
            let mut stopped = stopped.lock();
            if *stopped {
                break;
            }
            let _ = waker.wait_for(&mut stopped, interval);
            if *stopped {
                break;
            }
        }
        if session.is_dirty() {
            if let Err(e) = session.flush() {
                warn!(error = %e, "periodic metadata flush failed");
            }
        }
    }
    debug!("flush thread stopped");
}
