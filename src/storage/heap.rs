use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::common::config::logging_enabled;
use crate::common::types::{Lsn, PageId, Rid, Tuple, INVALID_LSN, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, TuplePage};
use crate::transaction::transaction::{Transaction, WriteOp, WriteRecord};
use crate::transaction::wal::log_manager::{LogError, LogManager};
use crate::transaction::wal::log_record::{LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum HeapError {
    #[error("Buffer pool error: {0}")]
    BufferError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("WAL error: {0}")]
    LogError(#[from] LogError),
}

/// Result type for heap operations
pub type Result<T> = std::result::Result<T, HeapError>;

/// A heap of slotted tuple pages chained through their `next_page_id`.
///
/// Every mutation writes its log record before the page is unpinned dirty,
/// stamps the page's LSN, and (while the transaction is active) pushes an
/// undo record onto the transaction's write set. During commit/abort the
/// same operations run again for finalization and rollback; the write set
/// is left alone because the transaction is no longer active.
pub struct TupleHeap {
    buffer_pool: Arc<BufferPoolManager>,
    log_manager: Option<Arc<LogManager>>,
    first_page_id: PageId,
}

impl TupleHeap {
    /// Create a heap with one empty page, logged as NEWPAGE.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Option<Arc<LogManager>>,
        txn: &mut Transaction,
    ) -> Result<Arc<Self>> {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            TuplePage::init(&mut guard, page_id, INVALID_PAGE_ID);
        }

        let heap = Arc::new(Self {
            buffer_pool: buffer_pool.clone(),
            log_manager,
            first_page_id: page_id,
        });
        let lsn = heap.log(
            txn,
            LogRecord::new_page(txn.id(), txn.prev_lsn(), INVALID_PAGE_ID, page_id),
        )?;
        if lsn != INVALID_LSN {
            page.write().set_lsn(lsn);
        }
        buffer_pool.unpin_page(page_id, true)?;
        Ok(heap)
    }

    /// Reopen a heap whose first page already exists (e.g. after recovery)
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Option<Arc<LogManager>>,
        first_page_id: PageId,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer_pool,
            log_manager,
            first_page_id,
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, walking the page chain and extending it when full
    pub fn insert_tuple(self: &Arc<Self>, tuple: &Tuple, txn: &mut Transaction) -> Result<Rid> {
        if tuple.len() > crate::storage::page::tuple_page::MAX_TUPLE_SIZE {
            return Err(PageError::InsufficientSpace.into());
        }
        let mut page_id = self.first_page_id;
        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let inserted = {
                let mut guard = page.write();
                TuplePage::insert_tuple(&mut guard, tuple)
            };

            match inserted {
                Ok(slot) => {
                    let rid = Rid::new(page_id, slot);
                    let lsn = self.log(
                        txn,
                        LogRecord::new_insert(txn.id(), txn.prev_lsn(), rid, tuple.clone()),
                    )?;
                    if lsn != INVALID_LSN {
                        page.write().set_lsn(lsn);
                    }
                    self.record_write(txn, WriteOp::Insert, rid, tuple.clone());
                    self.buffer_pool.unpin_page(page_id, true)?;
                    return Ok(rid);
                }
                Err(PageError::InsufficientSpace) => {
                    let next = TuplePage::next_page_id(&page.read());
                    if next != INVALID_PAGE_ID {
                        self.buffer_pool.unpin_page(page_id, false)?;
                        page_id = next;
                        continue;
                    }

                    // End of the chain: allocate and link a fresh page.
                    let (new_page, new_page_id) = self.buffer_pool.new_page()?;
                    {
                        let mut guard = new_page.write();
                        TuplePage::init(&mut guard, new_page_id, page_id);
                    }
                    let lsn = self.log(
                        txn,
                        LogRecord::new_page(txn.id(), txn.prev_lsn(), page_id, new_page_id),
                    )?;
                    if lsn != INVALID_LSN {
                        new_page.write().set_lsn(lsn);
                    }
                    {
                        let mut guard = page.write();
                        TuplePage::set_next_page_id(&mut guard, new_page_id);
                    }
                    self.buffer_pool.unpin_page(page_id, true)?;
                    debug!("tuple heap grew: page {} -> {}", page_id, new_page_id);
                    self.buffer_pool.unpin_page(new_page_id, true)?;
                    page_id = new_page_id;
                }
                Err(e) => {
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(e.into());
                }
            }
        }
    }

    /// Read a live tuple; `None` when the slot is empty or mark-deleted
    pub fn get_tuple(&self, rid: Rid) -> Result<Option<Tuple>> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = TuplePage::get_tuple(&page.read(), rid.slot);
        self.buffer_pool.unpin_page(rid.page_id, false)?;
        match result {
            Ok(tuple) => Ok(Some(tuple)),
            Err(PageError::TupleNotFound) | Err(PageError::InvalidSlot(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite a tuple in place, logging before and after images
    pub fn update_tuple(
        self: &Arc<Self>,
        new_tuple: &Tuple,
        rid: Rid,
        txn: &mut Transaction,
    ) -> Result<()> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let updated = {
            let mut guard = page.write();
            TuplePage::update_tuple(&mut guard, new_tuple, rid.slot)
        };
        let old_tuple = match updated {
            Ok(old) => old,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        let lsn = self.log(
            txn,
            LogRecord::new_update(
                txn.id(),
                txn.prev_lsn(),
                rid,
                old_tuple.clone(),
                new_tuple.clone(),
            ),
        )?;
        if lsn != INVALID_LSN {
            page.write().set_lsn(lsn);
        }
        self.record_write(txn, WriteOp::Update, rid, old_tuple);
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Tombstone a tuple; the physical delete is deferred to commit
    pub fn mark_delete(self: &Arc<Self>, rid: Rid, txn: &mut Transaction) -> Result<()> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let marked = {
            let mut guard = page.write();
            TuplePage::mark_delete(&mut guard, rid.slot)
        };
        let image = match marked {
            Ok(image) => image,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        let lsn = self.log(
            txn,
            LogRecord::new_delete(
                txn.id(),
                txn.prev_lsn(),
                LogRecordType::MarkDelete,
                rid,
                image.clone(),
            ),
        )?;
        if lsn != INVALID_LSN {
            page.write().set_lsn(lsn);
        }
        self.record_write(txn, WriteOp::Delete, rid, image);
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Physically remove a tuple. Finalizes a mark-delete at commit; undoes
    /// an insert at abort.
    pub fn apply_delete(self: &Arc<Self>, rid: Rid, txn: &mut Transaction) -> Result<()> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let deleted = {
            let mut guard = page.write();
            TuplePage::apply_delete(&mut guard, rid.slot)
        };
        let image = match deleted {
            Ok(image) => image,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        let lsn = self.log(
            txn,
            LogRecord::new_delete(
                txn.id(),
                txn.prev_lsn(),
                LogRecordType::ApplyDelete,
                rid,
                image,
            ),
        )?;
        if lsn != INVALID_LSN {
            page.write().set_lsn(lsn);
        }
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    /// Clear a tombstone during rollback
    pub fn rollback_delete(self: &Arc<Self>, rid: Rid, txn: &mut Transaction) -> Result<()> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let restored = {
            let mut guard = page.write();
            TuplePage::rollback_delete(&mut guard, rid.slot)
                .and_then(|()| TuplePage::get_tuple(&guard, rid.slot))
        };
        let image = match restored {
            Ok(image) => image,
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                return Err(e.into());
            }
        };

        let lsn = self.log(
            txn,
            LogRecord::new_delete(
                txn.id(),
                txn.prev_lsn(),
                LogRecordType::RollbackDelete,
                rid,
                image,
            ),
        )?;
        if lsn != INVALID_LSN {
            page.write().set_lsn(lsn);
        }
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        Ok(())
    }

    fn record_write(self: &Arc<Self>, txn: &mut Transaction, op: WriteOp, rid: Rid, tuple: Tuple) {
        if txn.is_active() {
            txn.write_set_mut().push(WriteRecord {
                op,
                rid,
                tuple,
                heap: self.clone(),
            });
        }
    }

    fn log(&self, txn: &mut Transaction, mut record: LogRecord) -> Result<Lsn> {
        if let Some(ref log_manager) = self.log_manager {
            if logging_enabled() {
                let lsn = log_manager.append(&mut record)?;
                txn.set_prev_lsn(lsn);
                return Ok(lsn);
            }
        }
        Ok(INVALID_LSN)
    }
}
