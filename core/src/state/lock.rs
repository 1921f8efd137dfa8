//! Advisory single-writer lock for the state file.
//!
//! Two processes reconciling the same state file would interleave writes, so
//! `Repository::open` takes an exclusive `flock` on `<state>.lock` and keeps
//! it until the repository is dropped.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::StateError;


/// File-lock guard that releases the lock on drop.
#[derive(Debug)]
pub struct StateLock {
    file: std::fs::File,
    path: PathBuf,
}

impl StateLock {
    /// Path of the lock file guarding `state_path`.
    pub fn lock_path(state_path: &Path) -> PathBuf {
        let mut name = state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        state_path.with_file_name(name)
    }

    /// Acquire the lock for `state_path`, retrying until `timeout` elapses.
    pub fn acquire(state_path: &Path, timeout: Duration) -> Result<StateLock, StateError> {
        let lock_path = Self::lock_path(state_path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| StateError::Io {
                path: lock_path.clone(),
                source,
            })?;

        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&file);
        let deadline = Instant::now() + timeout;

        loop {
            let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if ret == 0 {
                return Ok(StateLock {
                    file,
                    path: lock_path,
                });
            }
            if Instant::now() >= deadline {
                return Err(StateError::Locked { path: lock_path });
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // The lock file itself stays; removing it would let a waiter lock a
        // stale inode while a newcomer creates a fresh one.
        unsafe {
            libc::flock(
                std::os::unix::io::AsRawFd::as_raw_fd(&self.file),
                libc::LOCK_UN,
            );
        }
    }
}
