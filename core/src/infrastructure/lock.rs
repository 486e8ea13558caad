//! Advisory file lock with a bounded wait.
//!
//! Serialises symlink registration across concurrent devkit invocations.

use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};


/// Default bound on how long registration waits for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);


/// Held `flock`, released on drop.
///
/// The lock file stays in place: removing it would let a newcomer lock a
/// fresh inode at the same path while a waiter holds the old one.
#[derive(Debug)]
pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
}


impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}


impl Drop for LockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}


/// Take an exclusive lock on `lock_path`, polling every 50 ms until
/// `timeout_ms` has passed.
pub fn acquire_lock(lock_path: &Path, timeout_ms: u64) -> Result<LockGuard> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)
        .map_err(|e| Error::file(lock_path, e))?;

    let fd = file.as_raw_fd();
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    loop {
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            return Ok(LockGuard {
                file,
                path: lock_path.to_path_buf(),
            });
        }

        if Instant::now() >= deadline {
            return Err(Error::LockTimeout {
                path: lock_path.to_path_buf(),
                timeout_ms,
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}
