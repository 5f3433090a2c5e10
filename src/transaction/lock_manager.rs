use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::common::config::EngineConfig;
use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{Transaction, TransactionState};

/// Lock modes on a RID. An UPGRADING request converts an owned shared lock
/// into an exclusive one; it is promoted to EXCLUSIVE when granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    Upgrading,
}

#[derive(Debug)]
struct RequestState {
    mode: LockMode,
    granted: bool,
}

/// One queued lock request. Each request carries its own mutex and condvar
/// so releases wake exactly the intended waiter, in FIFO order, without
/// broadcast storms.
#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    state: Mutex<RequestState>,
    granted_cv: Condvar,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode, granted: bool) -> Self {
        Self {
            txn_id,
            state: Mutex::new(RequestState { mode, granted }),
            granted_cv: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut state = self.state.lock();
        while !state.granted {
            self.granted_cv.wait(&mut state);
        }
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    requests: Vec<Arc<LockRequest>>,
    /// At most one upgrade may be in flight per RID
    has_upgrading: bool,
}

#[derive(Debug, Default)]
struct RequestQueue {
    inner: Mutex<QueueInner>,
}

/// Tuple-level lock manager implementing two-phase locking with wait-die
/// deadlock prevention.
///
/// All lock calls return `false` when the transaction must abort: the
/// manager never retries internally, and a denied transaction is left in
/// the ABORTED state for the caller to roll back.
pub struct LockManager {
    strict_2pl: bool,
    lock_table: Mutex<HashMap<Rid, Arc<RequestQueue>>>,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self {
            strict_2pl,
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::new(config.strict_2pl)
    }

    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> bool {
        self.lock_template(txn, rid, LockMode::Shared)
    }

    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> bool {
        self.lock_template(txn, rid, LockMode::Exclusive)
    }

    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> bool {
        self.lock_template(txn, rid, LockMode::Upgrading)
    }

    fn lock_template(&self, txn: &mut Transaction, rid: Rid, mode: LockMode) -> bool {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        // Table latch only covers queue lookup; the queue's own latch takes
        // over before the table latch drops.
        let queue = {
            let mut table = self.lock_table.lock();
            table.entry(rid).or_default().clone()
        };
        let mut inner = queue.inner.lock();

        if mode == LockMode::Upgrading {
            if inner.has_upgrading {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            let pos = inner
                .requests
                .iter()
                .position(|request| request.txn_id == txn.id());
            let owns_granted_shared = pos.is_some_and(|p| {
                let state = inner.requests[p].state.lock();
                state.granted && state.mode == LockMode::Shared
            });
            if !owns_granted_shared {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            inner.requests.remove(pos.unwrap());
            assert!(
                txn.shared_lock_set_mut().remove(&rid),
                "upgrading transaction does not hold a shared lock on {}",
                rid
            );
        }

        let can_grant = match inner.requests.last() {
            None => true,
            Some(last) => {
                if mode == LockMode::Shared {
                    let state = last.state.lock();
                    state.granted && state.mode == LockMode::Shared
                } else {
                    false
                }
            }
        };

        // Wait-die: only older transactions may wait. A younger requester
        // dies on the spot, which keeps the waits-for graph acyclic.
        if !can_grant {
            let back_txn_id = inner.requests.last().unwrap().txn_id;
            if back_txn_id < txn.id() {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        }

        let upgrading = mode == LockMode::Upgrading;
        // An upgrade granted synchronously (the transaction was alone in the
        // queue) lands directly as an exclusive lock.
        let enqueue_mode = if upgrading && can_grant {
            LockMode::Exclusive
        } else {
            mode
        };
        let request = Arc::new(LockRequest::new(txn.id(), enqueue_mode, can_grant));
        inner.requests.push(request.clone());

        if !can_grant {
            inner.has_upgrading |= upgrading;
            drop(inner);
            request.wait();
        }

        // A waiting upgrade wakes up already promoted to exclusive.
        let granted_mode = request.state.lock().mode;
        if granted_mode == LockMode::Shared {
            txn.shared_lock_set_mut().insert(rid);
        } else {
            txn.exclusive_lock_set_mut().insert(rid);
        }
        true
    }

    /// Release the lock `txn` holds on `rid`. Under strict 2PL the
    /// transaction must already be committed or aborted.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if self.strict_2pl {
            if !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            ) {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        } else if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let mut table = self.lock_table.lock();
        let queue = table
            .get(&rid)
            .cloned()
            .unwrap_or_else(|| panic!("unlock: no lock queue for {}", rid));
        let mut inner = queue.inner.lock();

        let pos = inner
            .requests
            .iter()
            .position(|request| request.txn_id == txn.id())
            .unwrap_or_else(|| panic!("unlock: transaction {} holds no lock on {}", txn.id(), rid));
        let request = inner.requests.remove(pos);

        let mode = request.state.lock().mode;
        let removed = if mode == LockMode::Shared {
            txn.shared_lock_set_mut().remove(&rid)
        } else {
            txn.exclusive_lock_set_mut().remove(&rid)
        };
        assert!(removed, "lock set out of sync for {}", rid);

        if inner.requests.is_empty() {
            table.remove(&rid);
            return true;
        }
        drop(table);

        // Wake waiters from the head: either a batch of shared requests, or
        // a single exclusive/upgrading one if it now leads the queue.
        let mut idx = 0;
        while idx < inner.requests.len() {
            let waiter = inner.requests[idx].clone();
            let mut state = waiter.state.lock();
            if state.granted {
                break;
            }
            if state.mode == LockMode::Shared {
                state.granted = true;
                drop(state);
                waiter.granted_cv.notify_one();
                idx += 1;
                continue;
            }
            if idx == 0 {
                if state.mode == LockMode::Upgrading {
                    state.mode = LockMode::Exclusive;
                    inner.has_upgrading = false;
                }
                state.granted = true;
                drop(state);
                waiter.granted_cv.notify_one();
            }
            break;
        }
        true
    }

    /// Test hook: number of RIDs with live lock queues
    pub fn queue_count(&self) -> usize {
        self.lock_table.lock().len()
    }
}
