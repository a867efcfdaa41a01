use thiserror::Error;

use super::types::PageId;

/// Database error types
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage size {0} is not a multiple of the page size")]
    InvalidStorageSize(u64),

    #[error("no free pages")]
    NoFreePages,

    #[error("page {0} not allocated")]
    PageNotAllocated(PageId),
}

pub type Result<T> = std::result::Result<T, StratumError>;
