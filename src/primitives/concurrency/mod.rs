#![allow(unsafe_code)]
//! Advisory file locks that serialize commits across processes.
//!
//! The WAL file itself carries the lock: a committer holds an exclusive lock on
//! its first byte for the whole write/apply/truncate sequence. Locks are POSIX
//! record locks on unix, which are owned by the process, so [`WalLock::is_held`]
//! only observes writers in *other* processes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::types::{Result, StoreError};

const LOCK_START: u64 = 0;
const LOCK_LEN: u64 = 1;

/// Namespace for WAL lock operations.
pub struct WalLock;

/// Exclusive WAL lock; released on drop.
pub struct WalLockGuard {
    file: Arc<File>,
}

impl WalLock {
    /// Blocks until the exclusive lock on `file` is held.
    pub fn acquire(file: Arc<File>) -> Result<WalLockGuard> {
        lock_region(&file, LOCK_START, LOCK_LEN, true).map_err(StoreError::from)?;
        Ok(WalLockGuard { file })
    }

    /// Tries to take the lock without waiting; `None` if someone else holds it.
    pub fn try_acquire(file: Arc<File>) -> Result<Option<WalLockGuard>> {
        if lock_region(&file, LOCK_START, LOCK_LEN, false).map_err(StoreError::from)? {
            Ok(Some(WalLockGuard { file }))
        } else {
            Ok(None)
        }
    }

    /// Non-blocking check: true when another process is mid-commit on `wal_path`.
    pub fn is_held(wal_path: impl AsRef<Path>) -> Result<bool> {
        let file = match OpenOptions::new().read(true).write(true).open(wal_path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        Ok(Self::try_acquire(Arc::new(file))?.is_none())
    }
}

impl WalLockGuard {
    /// The locked file.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for WalLockGuard {
    fn drop(&mut self) {
        if let Err(err) = unlock_region(&self.file, LOCK_START, LOCK_LEN) {
            tracing::warn!(error = %err, "failed to release wal lock");
        }
    }
}

fn lock_region(file: &File, start: u64, len: u64, blocking: bool) -> io::Result<bool> {
    #[cfg(unix)]
    {
        unix::lock_region(file, start, len, blocking)
    }
    #[cfg(windows)]
    {
        windows::lock_region(file, start, len, blocking)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len, blocking);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file locking unsupported on this platform",
        ))
    }
}

fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::unlock_region(file, start, len)
    }
    #[cfg(windows)]
    {
        windows::unlock_region(file, start, len)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len);
        Ok(())
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn region(kind: libc::c_int, start: u64, len: u64) -> libc::flock {
        // fields beyond the portable five must be zero
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = kind as _;
        lock.l_whence = libc::SEEK_SET as _;
        lock.l_start = start as libc::off_t;
        lock.l_len = len as libc::off_t;
        lock
    }

    fn fcntl(file: &File, cmd: libc::c_int, lock: &mut libc::flock) -> io::Result<()> {
        match unsafe { libc::fcntl(file.as_raw_fd(), cmd, lock as *mut libc::flock) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn lock_region(file: &File, start: u64, len: u64, blocking: bool) -> io::Result<bool> {
        let mut lock = region(libc::F_WRLCK as libc::c_int, start, len);
        let cmd = if blocking { libc::F_SETLKW } else { libc::F_SETLK };
        loop {
            match fcntl(file, cmd, &mut lock) {
                Ok(()) => return Ok(true),
                Err(err) => match err.raw_os_error() {
                    Some(libc::EINTR) if blocking => continue,
                    Some(libc::EAGAIN) | Some(libc::EACCES) if !blocking => return Ok(false),
                    _ => return Err(err),
                },
            }
        }
    }

    pub fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
        let mut lock = region(libc::F_UNLCK as libc::c_int, start, len);
        fcntl(file, libc::F_SETLK, &mut lock)
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    fn overlapped_at(start: u64) -> OVERLAPPED {
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.Anonymous.Anonymous.Offset = start as u32;
        overlapped.Anonymous.Anonymous.OffsetHigh = (start >> 32) as u32;
        overlapped
    }

    pub fn lock_region(file: &File, start: u64, len: u64, blocking: bool) -> io::Result<bool> {
        let mut overlapped = overlapped_at(start);
        let flags = if blocking {
            LOCKFILE_EXCLUSIVE_LOCK
        } else {
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY
        };
        let handle = file.as_raw_handle() as isize;
        let res = unsafe {
            LockFileEx(handle, flags, 0, len as u32, (len >> 32) as u32, &mut overlapped)
        };
        if res != 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if !blocking && code as u32 == ERROR_LOCK_VIOLATION => Ok(false),
            _ => Err(err),
        }
    }

    pub fn unlock_region(file: &File, start: u64, len: u64) -> io::Result<()> {
        let mut overlapped = overlapped_at(start);
        let handle = file.as_raw_handle() as isize;
        let res =
            unsafe { UnlockFileEx(handle, 0, len as u32, (len >> 32) as u32, &mut overlapped) };
        if res != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
