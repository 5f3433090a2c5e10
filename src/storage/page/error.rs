use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Insufficient space on page")]
    InsufficientSpace,

    #[error("Invalid slot {0}")]
    InvalidSlot(u32),

    #[error("Tuple not found")]
    TupleNotFound,

    #[error("Slot {0} already occupied")]
    SlotOccupied(u32),

    #[error("Corrupted page: {0}")]
    Corrupted(String),
}
