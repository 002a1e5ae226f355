#![forbid(unsafe_code)]
//! Positioned I/O for the page store.
//!
//! A store is either a file or a shared in-memory buffer. Both implement
//! [`FileIo`]; the pager only ever addresses them by byte offset.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::primitives::pager::OpenMode;
use crate::types::{Result, StoreError};

/// Positioned I/O over a backing medium.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from offset `off`. A read past the end is `UnexpectedEof`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, growing the medium as needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes to durable storage.
    fn sync_all(&self) -> Result<()>;
    /// Length in bytes.
    fn len(&self) -> Result<u64>;
    /// True for a zero-length medium.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Sets the length, zero-filling on growth.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
fn read_once(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, dst, off)
}

#[cfg(unix)]
fn write_once(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, src, off)
}

#[cfg(windows)]
fn read_once(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, dst, off)
}

#[cfg(windows)]
fn write_once(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, src, off)
}

#[cfg(not(any(unix, windows)))]
fn read_once(_: &File, _: &mut [u8], _: u64) -> io::Result<usize> {
    Err(io::Error::new(ErrorKind::Unsupported, "positioned reads unsupported"))
}

#[cfg(not(any(unix, windows)))]
fn write_once(_: &File, _: &[u8], _: u64) -> io::Result<usize> {
    Err(io::Error::new(ErrorKind::Unsupported, "positioned writes unsupported"))
}

/// File-backed [`FileIo`]. Clones share the descriptor.
#[derive(Clone)]
pub struct StdFileIo {
    file: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    /// Opens `path` the way `mode` asks: read-only, read-write on an existing
    /// file, or read-write creating it.
    pub fn open_with_mode(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        if mode != OpenMode::ReadOnly {
            options
                .write(true)
                .create(mode == OpenMode::Create)
                .truncate(false);
        }
        Ok(Self::new(options.open(path)?))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            match read_once(&self.file, dst, off)? {
                0 => return Err(io::Error::new(ErrorKind::UnexpectedEof, "read past end").into()),
                n => {
                    dst = &mut std::mem::take(&mut dst)[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            match write_once(&self.file, src, off)? {
                0 => return Err(io::Error::new(ErrorKind::WriteZero, "short write").into()),
                n => {
                    src = &src[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }
}

/// Growable in-memory [`FileIo`].
///
/// Clones share the same buffer, so a store can be dropped and reopened over it.
#[derive(Clone, Default)]
pub struct MemIo {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemIo {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a copy of existing store bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Copies the current contents out.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }
}

fn to_index(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| StoreError::Invalid("offset exceeds address space"))
}

impl FileIo for MemIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let start = to_index(off)?;
        let buf = self.buf.lock();
        let src = buf
            .get(start..start + dst.len())
            .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "read past end"))?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let start = to_index(off)?;
        let end = start + src.len();
        let mut buf = self.buf.lock();
        if buf.len() < end {
            let grow = end - buf.len();
            buf.try_reserve(grow)?;
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.buf.lock().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let len = to_index(len)?;
        self.buf.lock().resize(len, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_pages_roundtrip_at_offsets() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let io = StdFileIo::open_with_mode(dir.path().join("pages.bin"), OpenMode::Create)?;
        io.write_at(2048, &[7u8; 1024])?;
        io.sync_all()?;
        assert_eq!(io.len()?, 3072);

        let mut page = [0u8; 1024];
        io.read_at(2048, &mut page)?;
        assert_eq!(page, [7u8; 1024]);
        io.read_at(0, &mut page)?;
        assert_eq!(page, [0u8; 1024]);
        Ok(())
    }

    #[test]
    fn reading_past_the_end_is_eof() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let io = StdFileIo::open_with_mode(dir.path().join("short.bin"), OpenMode::Create)?;
        io.write_at(0, b"abc")?;
        let mut buf = [0u8; 8];
        match io.read_at(0, &mut buf) {
            Err(StoreError::Io(inner)) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn only_create_mode_makes_new_files() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("missing.bin");
        assert!(StdFileIo::open_with_mode(&path, OpenMode::ReadOnly).is_err());
        assert!(StdFileIo::open_with_mode(&path, OpenMode::ReadWrite).is_err());
        StdFileIo::open_with_mode(&path, OpenMode::Create)?.write_at(0, b"x")?;

        let reader = StdFileIo::open_with_mode(&path, OpenMode::ReadOnly)?;
        assert!(reader.write_at(0, b"y").is_err());
        Ok(())
    }

    #[test]
    fn memory_clones_share_one_buffer() -> Result<()> {
        let io = MemIo::new();
        io.write_at(10, b"abc")?;
        assert_eq!(io.len()?, 13);
        let other = io.clone();
        let mut buf = [0u8; 3];
        other.read_at(10, &mut buf)?;
        assert_eq!(&buf, b"abc");
        assert!(other.read_at(12, &mut buf).is_err());
        other.truncate(4)?;
        assert_eq!(io.len()?, 4);
        assert_eq!(MemIo::from_bytes(io.snapshot()).snapshot(), vec![0u8; 4]);
        Ok(())
    }
}
