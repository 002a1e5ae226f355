//! Building blocks below the transaction cache: byte codecs, positioned I/O,
//! the writer lock, the page store and the write-ahead log.

/// Fixed-width big-endian field helpers and bounded readers/writers.
pub mod bytes;

/// Cross-process writer lock carried by the WAL file.
pub mod concurrency;

/// Positioned I/O over files and memory buffers.
pub mod io;

/// Page store and the header page layout.
pub mod pager;

/// Redo log that makes a commit atomic.
pub mod wal;
