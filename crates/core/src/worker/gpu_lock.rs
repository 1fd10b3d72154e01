//! Host-wide GPU mutex (§4.3, §5): an OS-level advisory file lock scoped to
//! the hardware-encoder attempts only. The software encoder never holds it.

use fd_lock::RwLock as FdRwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpuLockError {
    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to acquire exclusive lock on {path}: {source}")]
    Acquire {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Guards the file lock for the lifetime of a hardware-encoder attempt.
/// Released automatically on drop, including on an encoder crash or
/// cancellation, by the underlying `fd-lock` guard.
pub struct GpuLockGuard<'a> {
    _guard: fd_lock::RwLockWriteGuard<'a, File>,
}

/// Host-wide exclusive lock over the GPU encoder device, backed by a
/// single advisory file.
pub struct GpuLock {
    lock: FdRwLock<File>,
}

impl GpuLock {
    pub fn open(path: &Path) -> Result<Self, GpuLockError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| GpuLockError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            lock: FdRwLock::new(file),
        })
    }

    /// Acquire the exclusive lock, blocking the current thread. Call from
    /// within `spawn_blocking` — this is a blocking syscall.
    pub fn acquire(&mut self) -> Result<GpuLockGuard<'_>, GpuLockError> {
        let guard = self.lock.write().map_err(|source| GpuLockError::Acquire {
            path: PathBuf::new(),
            source,
        })?;
        Ok(GpuLockGuard { _guard: guard })
    }
}
