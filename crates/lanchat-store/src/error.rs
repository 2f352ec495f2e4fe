use lanchat_shared::FileId;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record with this id exists in the registry.
    #[error("File ID not found: {0}")]
    NotFound(FileId),

    /// The file exceeds the configured share limit; nothing was stored.
    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    /// The record exists but has no bytes in local session storage.
    #[error("File not found: no local bytes for {0}")]
    MissingBytes(FileId),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
