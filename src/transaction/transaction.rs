use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use crate::common::types::{Lsn, PageId, PagePtr, Rid, Tuple, TxnId, INVALID_LSN};
use crate::storage::heap::{HeapError, TupleHeap};
use crate::transaction::wal::log_manager::LogError;

/// Transaction states under two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is not active")]
    InvalidState(TxnId),

    #[error("Heap error: {0}")]
    HeapError(#[from] HeapError),

    #[error("Failed to write to WAL: {0}")]
    LogError(#[from] LogError),
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Kind of modification captured in the write set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

/// One undo record: enough to reverse the modification at abort, or to
/// finalize a deferred delete at commit.
pub struct WriteRecord {
    pub op: WriteOp,
    pub rid: Rid,
    /// Before-image for updates and deletes; the inserted image for inserts
    pub tuple: Tuple,
    pub heap: Arc<TupleHeap>,
}

/// An active database transaction.
///
/// A transaction is owned by a single thread; the lock manager and B+tree
/// mutate its bookkeeping through `&mut` access.
pub struct Transaction {
    id: TxnId,
    state: TransactionState,

    /// RIDs held under shared lock
    shared_lock_set: HashSet<Rid>,
    /// RIDs held under exclusive lock
    exclusive_lock_set: HashSet<Rid>,

    /// Undo records in execution order
    write_set: Vec<WriteRecord>,

    /// Pages latched by the current index operation, in descent order
    page_set: VecDeque<PagePtr>,
    /// Pages emptied by the current index operation, deleted after release
    deleted_page_set: HashSet<PageId>,

    /// LSN of this transaction's most recent log record
    prev_lsn: Lsn,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TransactionState::Growing,
            shared_lock_set: HashSet::new(),
            exclusive_lock_set: HashSet::new(),
            write_set: Vec::new(),
            page_set: VecDeque::new(),
            deleted_page_set: HashSet::new(),
            prev_lsn: INVALID_LSN,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Growing | TransactionState::Shrinking
        )
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn shared_lock_set(&self) -> &HashSet<Rid> {
        &self.shared_lock_set
    }

    pub fn shared_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.shared_lock_set
    }

    pub fn exclusive_lock_set(&self) -> &HashSet<Rid> {
        &self.exclusive_lock_set
    }

    pub fn exclusive_lock_set_mut(&mut self) -> &mut HashSet<Rid> {
        &mut self.exclusive_lock_set
    }

    pub fn write_set(&self) -> &Vec<WriteRecord> {
        &self.write_set
    }

    pub fn write_set_mut(&mut self) -> &mut Vec<WriteRecord> {
        &mut self.write_set
    }

    pub fn page_set_mut(&mut self) -> &mut VecDeque<PagePtr> {
        &mut self.page_set
    }

    pub fn deleted_page_set(&self) -> &HashSet<PageId> {
        &self.deleted_page_set
    }

    pub fn deleted_page_set_mut(&mut self) -> &mut HashSet<PageId> {
        &mut self.deleted_page_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let txn = Transaction::new(3);
        assert_eq!(txn.id(), 3);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        assert!(txn.shared_lock_set().is_empty());
        assert!(txn.exclusive_lock_set().is_empty());
        assert!(txn.write_set().is_empty());
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let mut txn = Transaction::new(1);
        txn.shared_lock_set_mut().insert(Rid::new(2, 0));
        txn.exclusive_lock_set_mut().insert(Rid::new(2, 1));
        assert!(txn.shared_lock_set().contains(&Rid::new(2, 0)));
        assert!(txn.exclusive_lock_set().contains(&Rid::new(2, 1)));
    }
}
