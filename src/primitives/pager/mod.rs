#![forbid(unsafe_code)]

mod meta;
mod pager;

pub use meta::{peek_page_size, Meta, META_MAGIC};
pub use pager::{
    wal_path, Backing, OpenMode, Pager, PagerOptions, Synchronous, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
