//! Advisory exclusive lock on the store directory.
//!
//! Writers (record appends and index persists) hold `store.lock` for the
//! duration of one write. Readers never take it.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{MemoryError, Result};

/// Lock file name within the store directory.
pub const LOCK_FILE: &str = "store.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Held exclusive lock. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the store lock, polling until `timeout` elapses.
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(MemoryError::storage(&path))?;

        let start = Instant::now();
        let mut contended = false;
        loop {
            match file.try_lock() {
                Ok(()) => {
                    if contended {
                        debug!(waited = ?start.elapsed(), "Acquired contended store lock");
                    }
                    return Ok(Self { file, path });
                }
                Err(TryLockError::WouldBlock) => {
                    contended = true;
                    if start.elapsed() >= timeout {
                        warn!(path = %path.display(), ?timeout, "Store lock timed out");
                        return Err(MemoryError::LockTimeout(timeout));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(TryLockError::Error(e)) => return Err(MemoryError::storage(&path)(e)),
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "Failed to release store lock");
        }
    }
}
