use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),

    #[error("Invalid magic number in header: {0:#010x}")]
    InvalidMagic(u32),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(i32),

    #[error("Invalid store size: {size} bytes (must be between {min} and {max})")]
    InvalidStoreSize { size: u64, min: u64, max: u64 },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Metadata table full: no free file slot")]
    TableFull,

    #[error("Free-block table full: {size} bytes at offset {start} could not be recorded")]
    FreeListFull { start: u32, size: u32 },

    #[error("Out of space: no free block of {requested} bytes")]
    OutOfSpace { requested: u32 },

    #[error("Invalid region: [{start}, +{size}) is outside the data region")]
    InvalidRegion { start: u32, size: u32 },

    #[error("Invalid size: {requested} (current size is {current})")]
    InvalidSize { requested: u32, current: u32 },

    #[error("File handle is not open")]
    NotOpen,

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Corrupted store: {0}")]
    Corrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FsError>;
