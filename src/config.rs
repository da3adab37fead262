//! Module implement crate wide configuration.
//!
//! Configuration is read once at startup, either built in code via the
//! `set_*` methods or loaded from a toml file, and installed with
//! [init_config] before the first partition or file-manager access.

use serde::Deserialize;

use std::{path, sync::RwLock};

use crate::{util, Result};

/// Default budget for resident file-manager storages, 256MB.
pub const CACHE_LIMIT: usize = 256 * 1024 * 1024;
/// Default file size at and above which files are memory mapped, 1MB.
pub const MAP_THRESHOLD: usize = 1024 * 1024;

/// Configuration for the column store.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Budget, in bytes, for storages kept resident by the file manager.
    /// Least-recently-used unreferenced storages are evicted beyond this.
    ///
    /// Default: [CACHE_LIMIT]
    pub cache_limit: usize,
    /// Files of at least this many bytes are memory mapped instead of read
    /// into heap buffers, when mapping is enabled.
    ///
    /// Default: [MAP_THRESHOLD]
    pub map_threshold: usize,
    /// Enable memory mapping of data and index files.
    ///
    /// Default: true
    pub use_mmap: bool,
    /// Keep arithmetic expressions exactly as written, disabling
    /// inverse-function cancellation during simplification.
    ///
    /// Default: false
    pub preserve_input_expressions: bool,
    /// Override the number of coarse bins in range-equality cascade
    /// indexes. Values below 5 fall back to the built-in heuristic.
    ///
    /// Default: None
    pub ncoarse: Option<u32>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            cache_limit: CACHE_LIMIT,
            map_threshold: MAP_THRESHOLD,
            use_mmap: true,
            preserve_input_expressions: false,
            ncoarse: None,
        }
    }
}

impl<'a> arbitrary::Arbitrary<'a> for Config {
    fn arbitrary(u: &mut arbitrary::Unstructured) -> arbitrary::Result<Self> {
        let config = Config {
            cache_limit: *u.choose(&[1024, 1_000_000, CACHE_LIMIT])?,
            map_threshold: *u.choose(&[0, 4096, MAP_THRESHOLD])?,
            use_mmap: u.arbitrary()?,
            preserve_input_expressions: u.arbitrary()?,
            ncoarse: u.arbitrary()?,
        };
        Ok(config)
    }
}

impl Config {
    /// Load configuration from a toml file.
    pub fn from_file<P>(loc: P) -> Result<Config>
    where
        P: AsRef<path::Path>,
    {
        util::load_toml(loc)
    }

    pub fn set_cache_limit(&mut self, bytes: usize) -> &mut Self {
        self.cache_limit = bytes;
        self
    }

    pub fn set_map_threshold(&mut self, bytes: usize) -> &mut Self {
        self.map_threshold = bytes;
        self
    }

    pub fn set_use_mmap(&mut self, use_mmap: bool) -> &mut Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn set_preserve_input_expressions(&mut self, preserve: bool) -> &mut Self {
        self.preserve_input_expressions = preserve;
        self
    }

    pub fn set_ncoarse(&mut self, ncoarse: Option<u32>) -> &mut Self {
        self.ncoarse = ncoarse;
        self
    }
}

lazy_static::lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::default());
}

/// Install `config` as the process wide configuration. Call before the
/// first use of [crate::filemgr] or any partition; later calls only
/// affect limits that are consulted dynamically.
pub fn init_config(config: Config) {
    *CONFIG.write().expect("config lock poisoned") = config;
}

pub(crate) fn current() -> Config {
    CONFIG.read().expect("config lock poisoned").clone()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
