//! Validation for file names stored in the metadata table
//!
//! Names live in a fixed 64-byte, NUL-terminated buffer, so a valid name is
//! 1 to 63 bytes long and contains no NUL byte.

use crate::catalog::metadata::NAME_LEN;
use crate::error::{FsError, Result};
use std::fmt;

/// A file name that fits the on-disk name buffer
///
/// # Examples
///
/// ```
/// use flatfs::validation::FileName;
///
/// let name = FileName::new("notes.txt").unwrap();
/// assert_eq!(name.as_str(), "notes.txt");
///
/// assert!(FileName::new("").is_err());
/// assert!(FileName::new("a\0b").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(String);

impl FileName {
    /// Longest name in bytes (one byte is kept for the terminator)
    pub const MAX_LENGTH: usize = NAME_LEN - 1;

    /// Create a new validated name
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name is empty, too long, or contains NUL.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate_name(&name)?;
        Ok(FileName(name))
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(FsError::InvalidName("name cannot be empty".to_string()));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(FsError::InvalidName(format!(
                "'{}' is {} bytes (max {})",
                name,
                name.len(),
                Self::MAX_LENGTH
            )));
        }

        if name.bytes().any(|b| b == 0) {
            return Err(FsError::InvalidName(
                "name cannot contain NUL bytes".to_string(),
            ));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for FileName {
    type Error = FsError;

    fn try_from(value: &str) -> Result<Self> {
        FileName::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(FileName::new("a").is_ok());
        assert!(FileName::new("hello world.txt").is_ok());
        assert!(FileName::new("x".repeat(63)).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(FileName::new(""), Err(FsError::InvalidName(_))));
        assert!(matches!(
            FileName::new("x".repeat(64)),
            Err(FsError::InvalidName(_))
        ));
        assert!(matches!(FileName::new("nul\0"), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn test_length_is_counted_in_bytes() {
        // 32 two-byte characters = 64 bytes
        assert!(FileName::new("é".repeat(32)).is_err());
        assert!(FileName::new("é".repeat(31)).is_ok());
    }
}
