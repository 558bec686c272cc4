// src/store/lock.rs

//! Advisory file lock on a store root
//!
//! `Remove` and `Optimise` mutate published entries, so they take an
//! exclusive `flock` on `<root>/.lock` to avoid racing each other and
//! concurrent writers. Readers never lock: entries are write-once and
//! read-only after publication. The lock is released when the guard is
//! dropped.

use crate::error::Result;
use fs2::FileExt;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Name of the lock file inside a store root
pub const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock, held while the guard lives
pub struct StoreLock {
    // Kept open to maintain the lock
    _file: File,
}

impl StoreLock {
    /// Acquire the lock, blocking until it is available
    pub fn acquire(root: &Path) -> Result<StoreLock> {
        let path = root.join(LOCK_FILE);
        let file = File::create(&path)?;
        file.lock_exclusive()?;
        debug!("acquired store lock at {:?}", path);
        Ok(StoreLock { _file: file })
    }

    /// Try to acquire without blocking; `None` when another process
    /// holds the lock
    pub fn try_acquire(root: &Path) -> Result<Option<StoreLock>> {
        let path = root.join(LOCK_FILE);
        let file = File::create(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(StoreLock { _file: file })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
