//! Store configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! store_path = "filesys.db"
//! store_size = 1048576
//! format_if_invalid = true
//! write_overflow = "relocate"
//! ```
//!
//! Every key is optional.

use crate::error::{FsError, Result};
use crate::header::{DATA_OFFSET, MAX_STORE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_STORE_PATH: &str = "filesys.db";

/// 1 MiB
pub const DEFAULT_STORE_SIZE: u64 = 1024 * 1024;

/// What a write does when it runs past the end of the file's extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Move the file to a new extent sized to the new length, copying the old bytes and
    /// releasing the old extent. Extent capacity always equals the logical size.
    #[default]
    Relocate,

    /// The extent is sized by the first write and never grows; later writes past it
    /// overwrite whatever follows in the data region. `shrink` and `remove` release
    /// `size` bytes from the extent start, so after such growth they can hand another
    /// file's live bytes back to the free list. Kept for compatibility testing against
    /// stores written by the legacy tool.
    Legacy,
}

impl FromStr for OverflowPolicy {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "relocate" => Ok(OverflowPolicy::Relocate),
            "legacy" => Ok(OverflowPolicy::Legacy),
            _ => Err(FsError::Config(format!(
                "Invalid overflow policy '{}'. Valid options: relocate, legacy",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsConfig {
    /// Path of the disk image
    pub store_path: PathBuf,

    /// Size used when the image has to be created
    pub store_size: u64,

    /// Recreate the image when it is missing or its header does not validate
    pub format_if_invalid: bool,

    pub write_overflow: OverflowPolicy,
}

impl Default for FsConfig {
    fn default() -> Self {
        FsConfig {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            store_size: DEFAULT_STORE_SIZE,
            format_if_invalid: true,
            write_overflow: OverflowPolicy::default(),
        }
    }
}

impl FsConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: FsConfig =
            toml::from_str(text).map_err(|e| FsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| FsError::Config(e.to_string()))
    }

    /// Check that `store_size` leaves room for a data region and fits `i32` offsets
    pub fn validate(&self) -> Result<()> {
        validate_store_size(self.store_size)
    }
}

pub fn validate_store_size(size: u64) -> Result<()> {
    if size <= DATA_OFFSET || size > MAX_STORE_SIZE {
        return Err(FsError::InvalidStoreSize {
            size,
            min: DATA_OFFSET + 1,
            max: MAX_STORE_SIZE,
        });
    }
    Ok(())
}
