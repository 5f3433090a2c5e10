use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::common::config::{logging_enabled, LOG_BUFFER_SIZE};
use crate::common::types::{Lsn, TxnId, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::{PageError, TuplePage};
use crate::transaction::wal::log_record::{LogPayload, LogRecord, LogRecordType};

/// Error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Disk manager error: {0}")]
    DiskError(#[from] DiskManagerError),

    #[error("Buffer pool error: {0}")]
    BufferError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("Corrupt log: {0}")]
    CorruptLog(String),
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Boot-time crash recovery: a combined analysis/redo pass over the whole
/// log followed by reverse-chain undo of every transaction that never
/// reached COMMIT or ABORT.
///
/// Recovery is single-threaded and runs before any normal work, with the
/// process-wide logging flag off so replay generates no new records.
pub struct LogRecovery {
    disk: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,

    /// Transactions with no COMMIT/ABORT yet, mapped to their last LSN
    active_txn: HashMap<TxnId, Lsn>,
    /// Byte offset of every record in the log file, for undo's seeks
    lsn_mapping: HashMap<Lsn, u64>,
    /// Highest LSN seen, for resuming LSN assignment afterwards
    max_lsn: Lsn,
}

impl LogRecovery {
    pub fn new(disk: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk,
            buffer_pool,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
            max_lsn: INVALID_LSN,
        }
    }

    /// Run the full recovery pass
    pub fn recover(&mut self) -> Result<()> {
        info!("recovery: starting redo pass");
        self.redo()?;
        info!(
            "recovery: redo complete, {} loser transaction(s)",
            self.active_txn.len()
        );
        self.undo()?;
        info!("recovery: undo complete");
        Ok(())
    }

    /// Highest LSN found in the log; the log manager resumes from the next one
    pub fn max_lsn(&self) -> Lsn {
        self.max_lsn
    }

    /// Transactions that were alive at the crash (valid between redo and undo)
    pub fn loser_transactions(&self) -> Vec<TxnId> {
        self.active_txn.keys().copied().collect()
    }

    /// Redo pass: read the log file front to back in buffer-sized chunks,
    /// rebuild the active-transaction and LSN-offset tables, and replay
    /// every operation whose LSN is newer than its page's.
    pub fn redo(&mut self) -> Result<()> {
        assert!(
            !logging_enabled(),
            "recovery must run with logging disabled"
        );
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let mut buf = vec![0u8; LOG_BUFFER_SIZE];
        // Offset in the log file corresponding to buf[0]
        let mut buf_offset: u64 = 0;
        // Bytes of an incomplete record carried over from the previous fill
        let mut carry = 0usize;

        loop {
            let read = self.disk.read_log(&mut buf[carry..], buf_offset + carry as u64)?;
            if read == 0 {
                break;
            }
            let valid = carry + read;

            let mut pos = 0usize;
            while let Some(record) = LogRecord::deserialize(&buf[pos..valid]) {
                self.lsn_mapping.insert(record.lsn, buf_offset + pos as u64);
                self.active_txn.insert(record.txn_id, record.lsn);
                self.max_lsn = self.max_lsn.max(record.lsn);
                pos += record.size as usize;

                match record.record_type {
                    LogRecordType::Begin => {}
                    LogRecordType::Commit | LogRecordType::Abort => {
                        let removed = self.active_txn.remove(&record.txn_id);
                        assert!(removed.is_some(), "commit/abort for unknown transaction");
                    }
                    LogRecordType::NewPage => self.redo_new_page(&record)?,
                    _ => self.redo_tuple_op(&record)?,
                }
            }

            // A record split across the buffer boundary moves to the front;
            // the next fill completes it.
            buf.copy_within(pos..valid, 0);
            carry = valid - pos;
            buf_offset += pos as u64;
        }

        debug!(
            "redo scanned {} record(s), {} active at end",
            self.lsn_mapping.len(),
            self.active_txn.len()
        );
        Ok(())
    }

    fn redo_new_page(&mut self, record: &LogRecord) -> Result<()> {
        let LogPayload::NewPage {
            prev_page_id,
            page_id,
        } = record.payload
        else {
            return Err(RecoveryError::CorruptLog(
                "NEWPAGE record without page payload".to_string(),
            ));
        };

        let page = self.buffer_pool.fetch_page(page_id)?;
        let need_redo = record.lsn > page.read().lsn();
        if need_redo {
            {
                let mut guard = page.write();
                TuplePage::init(&mut guard, page_id, prev_page_id);
                guard.set_lsn(record.lsn);
            }
            if prev_page_id != INVALID_PAGE_ID {
                let prev_page = self.buffer_pool.fetch_page(prev_page_id)?;
                {
                    let mut guard = prev_page.write();
                    TuplePage::set_next_page_id(&mut guard, page_id);
                }
                self.buffer_pool.unpin_page(prev_page_id, true)?;
            }
        }
        self.buffer_pool.unpin_page(page_id, need_redo)?;
        Ok(())
    }

    fn redo_tuple_op(&mut self, record: &LogRecord) -> Result<()> {
        let rid = record.rid().ok_or_else(|| {
            RecoveryError::CorruptLog(format!(
                "{:?} record without a RID",
                record.record_type
            ))
        })?;

        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let need_redo = record.lsn > page.read().lsn();
        let result = if need_redo {
            let mut guard = page.write();
            let applied = match (&record.record_type, &record.payload) {
                (LogRecordType::Insert, LogPayload::Insert { tuple, .. }) => {
                    TuplePage::insert_tuple_at(&mut guard, tuple, rid.slot)
                }
                (LogRecordType::Update, LogPayload::Update { new_tuple, .. }) => {
                    TuplePage::update_tuple(&mut guard, new_tuple, rid.slot).map(|_| ())
                }
                (LogRecordType::MarkDelete, _) => {
                    TuplePage::mark_delete(&mut guard, rid.slot).map(|_| ())
                }
                (LogRecordType::ApplyDelete, _) => {
                    TuplePage::apply_delete(&mut guard, rid.slot).map(|_| ())
                }
                (LogRecordType::RollbackDelete, _) => {
                    TuplePage::rollback_delete(&mut guard, rid.slot)
                }
                _ => {
                    return Err(RecoveryError::CorruptLog(format!(
                        "malformed {:?} record",
                        record.record_type
                    )))
                }
            };
            if applied.is_ok() {
                guard.set_lsn(record.lsn);
            }
            applied
        } else {
            Ok(())
        };

        self.buffer_pool.unpin_page(rid.page_id, need_redo)?;
        result.map_err(RecoveryError::from)
    }

    /// Undo pass: for every loser transaction, follow its `prev_lsn` chain
    /// backwards and apply the inverse of each operation.
    pub fn undo(&mut self) -> Result<()> {
        assert!(
            !logging_enabled(),
            "recovery must run with logging disabled"
        );

        let losers: Vec<(TxnId, Lsn)> = self
            .active_txn
            .iter()
            .map(|(&txn_id, &lsn)| (txn_id, lsn))
            .collect();

        let mut buf = vec![0u8; LOG_BUFFER_SIZE];
        for (txn_id, last_lsn) in losers {
            debug!("undoing transaction {} from lsn {}", txn_id, last_lsn);
            let mut lsn = last_lsn;
            while lsn != INVALID_LSN {
                let offset = *self.lsn_mapping.get(&lsn).ok_or_else(|| {
                    RecoveryError::CorruptLog(format!("no offset recorded for lsn {}", lsn))
                })?;
                let read = self.disk.read_log(&mut buf, offset)?;
                let record = LogRecord::deserialize(&buf[..read]).ok_or_else(|| {
                    RecoveryError::CorruptLog(format!("unreadable record at offset {}", offset))
                })?;
                assert_eq!(record.lsn, lsn, "lsn mapping points at the wrong record");
                lsn = record.prev_lsn;

                match record.record_type {
                    LogRecordType::Begin => {
                        assert_eq!(record.prev_lsn, INVALID_LSN);
                    }
                    LogRecordType::Commit | LogRecordType::Abort => {
                        unreachable!("undo walked into a {:?} record", record.record_type)
                    }
                    LogRecordType::NewPage => self.undo_new_page(&record)?,
                    _ => self.undo_tuple_op(&record)?,
                }
            }
        }

        self.active_txn.clear();
        self.lsn_mapping.clear();
        Ok(())
    }

    fn undo_new_page(&mut self, record: &LogRecord) -> Result<()> {
        let LogPayload::NewPage {
            prev_page_id,
            page_id,
        } = record.payload
        else {
            return Err(RecoveryError::CorruptLog(
                "NEWPAGE record without page payload".to_string(),
            ));
        };

        self.buffer_pool.delete_page(page_id)?;
        self.disk.deallocate_page(page_id)?;

        if prev_page_id != INVALID_PAGE_ID {
            let prev_page = self.buffer_pool.fetch_page(prev_page_id)?;
            {
                let mut guard = prev_page.write();
                assert_eq!(TuplePage::next_page_id(&guard), page_id);
                TuplePage::set_next_page_id(&mut guard, INVALID_PAGE_ID);
            }
            self.buffer_pool.unpin_page(prev_page_id, true)?;
        }
        Ok(())
    }

    fn undo_tuple_op(&mut self, record: &LogRecord) -> Result<()> {
        let rid = record.rid().ok_or_else(|| {
            RecoveryError::CorruptLog(format!(
                "{:?} record without a RID",
                record.record_type
            ))
        })?;

        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut guard = page.write();
            assert!(
                guard.lsn() >= record.lsn,
                "undo saw a page older than its log record"
            );
            match (&record.record_type, &record.payload) {
                (LogRecordType::Insert, _) => {
                    TuplePage::apply_delete(&mut guard, rid.slot).map(|_| ())
                }
                (
                    LogRecordType::Update,
                    LogPayload::Update {
                        old_tuple,
                        new_tuple,
                        ..
                    },
                ) => TuplePage::update_tuple(&mut guard, old_tuple, rid.slot).map(|prior| {
                    assert_eq!(
                        &prior, new_tuple,
                        "undo of update found unexpected page content"
                    );
                }),
                (LogRecordType::MarkDelete, _) => {
                    TuplePage::rollback_delete(&mut guard, rid.slot)
                }
                (LogRecordType::ApplyDelete, LogPayload::Delete { tuple, .. }) => {
                    TuplePage::insert_tuple_at(&mut guard, tuple, rid.slot)
                }
                (LogRecordType::RollbackDelete, _) => {
                    TuplePage::mark_delete(&mut guard, rid.slot).map(|_| ())
                }
                _ => {
                    return Err(RecoveryError::CorruptLog(format!(
                        "malformed {:?} record",
                        record.record_type
                    )))
                }
            }
        };

        self.buffer_pool.unpin_page(rid.page_id, true)?;
        result.map_err(RecoveryError::from)
    }
}
