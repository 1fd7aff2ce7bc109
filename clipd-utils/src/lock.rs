//! Single-instance lock for the clipd daemon
//!
//! An exclusive, non-blocking flock on a fixed runtime-dir path keeps
//! a second daemon from starting and doubles as the liveness probe for
//! `clipd query`: probing never blocks and never steals the lock from
//! a running instance.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::{paths, ClipdError, Result};

/// Held exclusive lock. Released when dropped (process exit included).
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the daemon instance lock at the default path
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(&paths::lock_file())
    }

    /// Acquire an exclusive lock at the given path
    ///
    /// Fails with [`ClipdError::AlreadyRunning`] when another process
    /// holds the lock.
    pub fn acquire_at(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            paths::ensure_dir(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ClipdError::FileWrite {
                path: path.to_path_buf(),
                source: e,
            })?;

        match try_flock(&file) {
            FlockResult::Acquired => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            FlockResult::Held => Err(ClipdError::AlreadyRunning),
            FlockResult::Failed(e) => Err(ClipdError::FileWrite {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Check whether a daemon currently holds the lock at the default path
    pub fn daemon_running() -> Result<bool> {
        Self::daemon_running_at(&paths::lock_file())
    }

    /// Check whether a daemon currently holds the lock at the given path
    ///
    /// Takes and immediately releases the lock when it is free, so a
    /// running daemon is never disturbed.
    pub fn daemon_running_at(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ClipdError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;

        match try_flock(&file) {
            // Lock was free; dropping the fd releases it again
            FlockResult::Acquired => Ok(false),
            FlockResult::Held => Ok(true),
            FlockResult::Failed(e) => Err(ClipdError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Path of the held lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum FlockResult {
    Acquired,
    Held,
    Failed(std::io::Error),
}

fn try_flock(file: &File) -> FlockResult {
    // SAFETY: flock on an owned, open fd
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return FlockResult::Acquired;
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        FlockResult::Held
    } else {
        FlockResult::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("clipd.lock");

        let lock = InstanceLock::acquire_at(&path).unwrap();
        assert_eq!(lock.path(), path);
        drop(lock);

        // Reacquirable after release
        let _lock = InstanceLock::acquire_at(&path).unwrap();
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("clipd.lock");

        let _held = InstanceLock::acquire_at(&path).unwrap();
        // Same-process flock of a second fd on the same file contends
        let second = InstanceLock::acquire_at(&path);
        assert!(matches!(second, Err(ClipdError::AlreadyRunning)));
    }

    #[test]
    fn test_daemon_running_probe() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("clipd.lock");

        // No lock file yet: not running
        assert!(!InstanceLock::daemon_running_at(&path).unwrap());

        let held = InstanceLock::acquire_at(&path).unwrap();
        assert!(InstanceLock::daemon_running_at(&path).unwrap());

        drop(held);
        assert!(!InstanceLock::daemon_running_at(&path).unwrap());
    }

    #[test]
    fn test_probe_does_not_steal_lock() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("clipd.lock");

        let _held = InstanceLock::acquire_at(&path).unwrap();
        // Probe twice; lock must stay held throughout
        assert!(InstanceLock::daemon_running_at(&path).unwrap());
        assert!(InstanceLock::daemon_running_at(&path).unwrap());
    }
}
