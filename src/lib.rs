//! Embeddable transactional key/value kernel over fixed-size pages.
//!
//! Every structure lives in pages of a single store file. Reads and writes go
//! through [`storage::cache::PageCache`], which stages changes in memory until
//! [`commit`](storage::cache::PageCache::commit) makes them durable through a
//! write-ahead log. On top of the cache sit a B+ tree, a rank-ordered skip
//! index, a chunked positional list and the per-database key index. [`Db`]
//! exposes list, set, hash and sorted-set commands built from them.
//!
//! ```no_run
//! use pagekv::{Config, Db};
//!
//! # fn main() -> pagekv::Result<()> {
//! let mut db = Db::open("data.pkv", Config::default())?;
//! db.set_string(b"greeting", b"hello")?;
//! db.commit()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod db;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::{parse_score_bound, Config, ConfigError, Db};
pub use logging::init_logging;
pub use primitives::pager::{OpenMode, Synchronous};
pub use storage::keys::{KeyKind, KeyRecord, WatchOutcome, WatchToken};
pub use storage::{Direction, Rebalance};
pub use types::{Digest, PageId, Result, StoreError};
