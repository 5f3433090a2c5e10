// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::types::{Lsn, Page, PageId, Rid, Tuple, TxnId};
pub use index::btree::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::heap::TupleHeap;
pub use transaction::wal::{LogManager, LogRecovery};
pub use transaction::{LockManager, Transaction, TransactionManager};
