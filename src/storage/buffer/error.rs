use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;
use crate::transaction::wal::log_manager::LogError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Page {0} is pinned")]
    PagePinned(PageId),

    #[error("No free frames available: all pages pinned")]
    NoFreeFrames,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("WAL error: {0}")]
    WalError(#[from] LogError),
}
