// this_file: src/config.rs
//! JSON configuration for the face pipeline
//!
//! Every field has a default, so `{}` is a valid configuration. The disk cache
//! root holds one sub-directory per image variant.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum accepted configuration file size (64KB)
pub const MAX_CONFIG_SIZE: u64 = 64 * 1024;

/// Default number of simultaneously outstanding askface requests
pub const DEFAULT_CONCURRENT_ASKFACE_COMMANDS: usize = 8;

/// Default number of resolved faces kept in memory
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 4096;

/// Default edge length of a map square in pixels
pub const DEFAULT_SQUARE_SIZE: u32 = 64;

/// Sub-directory for images as received from the server
pub const ORIGINAL_CACHE_DIR: &str = "cache";

/// Sub-directory for 2x scaled images
pub const SCALED_CACHE_DIR: &str = "cache-x2";

/// Sub-directory for 1/8 scaled magic map images
pub const MAGIC_MAP_CACHE_DIR: &str = "cache-mm";

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FacesConfig {
    /// Root directory of the disk cache
    pub cache_dir: PathBuf,
    /// Bound on in-flight askface requests
    pub concurrent_askface_commands: usize,
    /// Number of resolved faces kept in the in-memory LRU
    pub memory_cache_capacity: usize,
    /// Edge length of the empty and unknown sentinel images
    pub square_size: u32,
    /// Optional PNG used for the "unknown" placeholder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_image: Option<PathBuf>,
}

impl Default for FacesConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("facecache"),
            concurrent_askface_commands: DEFAULT_CONCURRENT_ASKFACE_COMMANDS,
            memory_cache_capacity: DEFAULT_MEMORY_CACHE_CAPACITY,
            square_size: DEFAULT_SQUARE_SIZE,
            unknown_image: None,
        }
    }
}

impl FacesConfig {
    /// Parse and validate a configuration from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FacesConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        if size > MAX_CONFIG_SIZE {
            return Err(Error::Config(format!(
                "{}: file too large ({} bytes, max {})",
                path.display(),
                size,
                MAX_CONFIG_SIZE
            )));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_askface_commands == 0 {
            return Err(Error::Config(
                "concurrent_askface_commands must be at least 1".into(),
            ));
        }

        if self.memory_cache_capacity == 0 {
            return Err(Error::Config(
                "memory_cache_capacity must be at least 1".into(),
            ));
        }

        if self.square_size == 0 || self.square_size % 8 != 0 || self.square_size > 1024 {
            return Err(Error::Config(format!(
                "square_size must be a multiple of 8 between 8 and 1024 (got {})",
                self.square_size
            )));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("cache_dir cannot be empty".into()));
        }

        Ok(())
    }

    /// Directory of the original-size image cache
    pub fn original_dir(&self) -> PathBuf {
        self.cache_dir.join(ORIGINAL_CACHE_DIR)
    }

    /// Directory of the 2x image cache
    pub fn scaled_dir(&self) -> PathBuf {
        self.cache_dir.join(SCALED_CACHE_DIR)
    }

    /// Directory of the magic map image cache
    pub fn magic_map_dir(&self) -> PathBuf {
        self.cache_dir.join(MAGIC_MAP_CACHE_DIR)
    }
}
