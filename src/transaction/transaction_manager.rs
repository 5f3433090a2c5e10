use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;

use crate::common::config::logging_enabled;
use crate::common::types::{Rid, INVALID_LSN};
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{Result, Transaction, TransactionState, WriteOp};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecord;

/// Creates transactions and drives them through commit and abort.
///
/// Commit finalizes deferred deletes, forces the COMMIT record to disk, and
/// only then releases locks (strict-2PL durability). Abort walks the write
/// set backwards to undo every modification before releasing anything.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            log_manager,
        }
    }

    /// Start a new transaction, logging BEGIN
    pub fn begin(&self) -> Result<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut txn = Transaction::new(txn_id);

        if let Some(ref log_manager) = self.log_manager {
            if logging_enabled() {
                assert_eq!(txn.prev_lsn(), INVALID_LSN);
                let mut record = LogRecord::new_begin(txn_id);
                let lsn = log_manager.append(&mut record)?;
                txn.set_prev_lsn(lsn);
            }
        }
        Ok(txn)
    }

    /// Commit: finalize deferred deletes, force the log, release locks
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        txn.set_state(TransactionState::Committed);

        // Mark-deletes become real deletes only now that commit is certain.
        while let Some(record) = txn.write_set_mut().pop() {
            if record.op == WriteOp::Delete {
                record.heap.apply_delete(record.rid, txn)?;
            }
        }

        if let Some(ref log_manager) = self.log_manager {
            if logging_enabled() {
                let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
                let lsn = log_manager.append(&mut record)?;
                txn.set_prev_lsn(lsn);
                // The COMMIT record must be durable before any lock drops.
                log_manager.flush(false)?;
            }
        }

        self.release_all_locks(txn);
        Ok(())
    }

    /// Abort: roll back the write set in reverse, force the log, release locks
    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        txn.set_state(TransactionState::Aborted);

        while let Some(record) = txn.write_set_mut().pop() {
            match record.op {
                WriteOp::Insert => {
                    debug!("txn {}: rollback insert at {}", txn.id(), record.rid);
                    record.heap.apply_delete(record.rid, txn)?;
                }
                WriteOp::Update => {
                    debug!("txn {}: rollback update at {}", txn.id(), record.rid);
                    record.heap.update_tuple(&record.tuple, record.rid, txn)?;
                }
                WriteOp::Delete => {
                    debug!("txn {}: rollback delete at {}", txn.id(), record.rid);
                    record.heap.rollback_delete(record.rid, txn)?;
                }
            }
        }

        if let Some(ref log_manager) = self.log_manager {
            if logging_enabled() {
                let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
                let lsn = log_manager.append(&mut record)?;
                txn.set_prev_lsn(lsn);
                log_manager.flush(false)?;
            }
        }

        self.release_all_locks(txn);
        Ok(())
    }

    fn release_all_locks(&self, txn: &mut Transaction) {
        let mut lock_set: HashSet<Rid> = HashSet::new();
        lock_set.extend(txn.shared_lock_set().iter().copied());
        lock_set.extend(txn.exclusive_lock_set().iter().copied());
        for rid in lock_set {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
