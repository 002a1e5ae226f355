use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::pager::{
    OpenMode, PagerOptions, Synchronous, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};

/// Settings for opening a [`Db`](super::Db).
///
/// Missing TOML keys fall back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Page size for new stores; existing stores keep the size they were created with.
    pub page_size: u32,
    /// Number of logical databases in a new store.
    pub database_count: u32,
    /// Read cache capacity in pages.
    pub cache_pages: usize,
    /// Commit durability.
    pub synchronous: Synchronous,
    /// Open mode.
    pub mode: OpenMode,
    /// Fixed seed for version stamps and skip levels; entropy when unset.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            database_count: 16,
            cache_pages: 1024,
            synchronous: Synchronous::Full,
            mode: OpenMode::Create,
            rng_seed: None,
        }
    }
}

impl Config {
    /// Syncs the WAL and the store on every commit.
    pub fn durable() -> Self {
        Self::default()
    }

    /// Larger pages and cache, no explicit syncs.
    pub fn fast() -> Self {
        Self {
            page_size: 4096,
            cache_pages: 8192,
            synchronous: Synchronous::Off,
            ..Self::default()
        }
    }

    /// Deterministic randomness and no syncs, for tests.
    pub fn testing(seed: u64) -> Self {
        Self {
            synchronous: Synchronous::Off,
            rng_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Sets the page size used when creating a store.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the database count used when creating a store.
    pub fn with_database_count(mut self, database_count: u32) -> Self {
        self.database_count = database_count;
        self
    }

    /// Sets the read cache capacity.
    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Sets commit durability.
    pub fn with_synchronous(mut self, synchronous: Synchronous) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Sets the open mode.
    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Opens read-only.
    pub fn read_only(self) -> Self {
        self.with_mode(OpenMode::ReadOnly)
    }

    /// Fixes the PRNG seed.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the settings as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    /// Checks the page size and database count against the header limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
            || !self.page_size.is_power_of_two()
        {
            return Err(ConfigError::PageSize {
                value: self.page_size,
            });
        }
        let header_len = 40u64 + 8 * u64::from(self.database_count);
        if self.database_count == 0 || header_len > u64::from(self.page_size) {
            return Err(ConfigError::DatabaseCount {
                value: self.database_count,
                page_size: self.page_size,
            });
        }
        if self.cache_pages == 0 {
            return Err(ConfigError::CachePages);
        }
        Ok(())
    }

    /// Options handed to the pager and cache.
    pub fn pager_options(&self) -> PagerOptions {
        PagerOptions {
            page_size: self.page_size,
            database_count: self.database_count,
            cache_pages: self.cache_pages,
            synchronous: self.synchronous,
            mode: self.mode,
        }
    }
}

impl From<&Config> for PagerOptions {
    fn from(config: &Config) -> Self {
        config.pager_options()
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The TOML did not parse into a [`Config`].
    #[error("failed to parse config: {source}")]
    Parse {
        /// File that failed, when loaded from disk.
        path: Option<PathBuf>,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// The settings could not be rendered.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// Page size outside the supported range or not a power of two.
    #[error("page size {value} must be a power of two between 1024 and 65536")]
    PageSize {
        /// Rejected value.
        value: u32,
    },
    /// The database roots do not fit the header page.
    #[error("database count {value} does not fit a {page_size}-byte header page")]
    DatabaseCount {
        /// Rejected value.
        value: u32,
        /// Page size it was checked against.
        page_size: u32,
    },
    /// A zero-capacity read cache.
    #[error("cache_pages must be at least 1")]
    CachePages,
}
