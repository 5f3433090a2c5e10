use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    BufferError(#[from] BufferPoolError),

    #[error("Corrupted index: {0}")]
    Corrupted(String),
}

/// Result type for B+tree operations
pub type Result<T> = std::result::Result<T, BTreeError>;
