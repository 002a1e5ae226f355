//! Optional `tracing` subscriber for binaries and tests embedding the store.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Result, StoreError};

/// Installs a formatted subscriber filtered at `level`.
///
/// `RUST_LOG`, when set and valid, takes precedence over `level`. Installing a
/// second global subscriber fails with `Invalid`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|_| StoreError::Invalid("invalid log level"))?,
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| StoreError::Invalid("logging already initialized"))
}
