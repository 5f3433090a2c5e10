use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::common::rwlatch::RwLatch;
use crate::common::types::{Page, PageId, PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::Result;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::internal::InternalPage;
use crate::index::btree::page::leaf::LeafPage;
use crate::index::btree::page::{self as header};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;
use crate::transaction::transaction::Transaction;

/// What a descent intends to do; drives latch modes and crab-release safety
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpType {
    Read,
    Insert,
    Delete,
}

/// Per-operation descent state.
///
/// `root_locked` is the root-latch re-entrance counter: the latch is taken
/// exactly once per descent and released either by crabbing or at the end,
/// and the counter keeps a later release from double-unlocking.
pub(crate) struct OpContext<'a> {
    pub(crate) op: OpType,
    pub(crate) txn: Option<&'a mut Transaction>,
    pub(crate) root_locked: u32,
}

impl<'a> OpContext<'a> {
    pub(crate) fn new(op: OpType, txn: Option<&'a mut Transaction>) -> Self {
        Self {
            op,
            txn,
            root_locked: 0,
        }
    }
}

/// Concurrent B+tree index mapping fixed-width keys to RIDs.
///
/// Pages come from the buffer pool; descents use latch crabbing (ancestors
/// are released as soon as a child is proven safe for the operation), and a
/// tree-wide writer-preferring latch guards the identity of the root page.
/// The root page id is persisted in the header page under the index name.
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: AtomicU32,
    root_latch: RwLatch,
    leaf_max_size: i32,
    internal_max_size: i32,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open (or create) an index with fan-out derived from the page size
    pub fn new(index_name: &str, buffer_pool: Arc<BufferPoolManager>) -> Result<Self> {
        Self::with_max_sizes(
            index_name,
            buffer_pool,
            LeafPage::<K>::default_max_size(),
            InternalPage::<K>::default_max_size(),
        )
    }

    /// Open (or create) an index with explicit fan-out, mainly so tests can
    /// force splits and merges with few keys.
    pub fn with_max_sizes(
        index_name: &str,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Result<Self> {
        let root_page_id =
            HeaderPage::get_root(&buffer_pool, index_name)?.unwrap_or(INVALID_PAGE_ID);
        Ok(Self {
            index_name: index_name.to_string(),
            buffer_pool,
            root_page_id: AtomicU32::new(root_page_id),
            root_latch: RwLatch::new(),
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id.load(Ordering::Acquire) == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(Ordering::Acquire)
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub(crate) fn leaf_max_size(&self) -> i32 {
        self.leaf_max_size
    }

    pub(crate) fn internal_max_size(&self) -> i32 {
        self.internal_max_size
    }

    /// Point query
    pub fn get_value(&self, key: &K, txn: Option<&mut Transaction>) -> Result<Option<Rid>> {
        let mut ctx = OpContext::new(OpType::Read, txn);
        let Some(leaf) = self.find_leaf_page(Some(key), &mut ctx)? else {
            return Ok(None);
        };
        let result = LeafPage::<K>::lookup(&leaf.read(), key);
        self.free_pages(false, &mut ctx, Some(&leaf))?;
        Ok(result)
    }

    /// Persist a root change into the header page
    pub(crate) fn set_root_page_id(&self, root_page_id: PageId) -> Result<()> {
        self.root_page_id.store(root_page_id, Ordering::Release);
        HeaderPage::set_root(&self.buffer_pool, &self.index_name, root_page_id)?;
        Ok(())
    }

    pub(crate) fn lock_root(&self, exclusive: bool, ctx: &mut OpContext<'_>) {
        if exclusive {
            self.root_latch.write_lock();
        } else {
            self.root_latch.read_lock();
        }
        ctx.root_locked += 1;
    }

    pub(crate) fn try_unlock_root(&self, exclusive: bool, ctx: &mut OpContext<'_>) {
        if ctx.root_locked > 0 {
            if exclusive {
                self.root_latch.write_unlock();
            } else {
                self.root_latch.read_unlock();
            }
            ctx.root_locked -= 1;
        }
    }

    /// A page is safe for an operation when a change to it cannot propagate
    /// to its parent.
    fn is_safe(page: &Page, op: OpType) -> bool {
        match op {
            OpType::Read => true,
            OpType::Insert => header::size(page) < header::max_size(page),
            OpType::Delete => {
                let min = if header::is_leaf(page) {
                    LeafPage::<K>::min_size(page)
                } else {
                    InternalPage::<K>::min_size(page)
                };
                header::size(page) > min
            }
        }
    }

    /// Fetch and latch one page along a descent. If the page turns out safe
    /// (or the descent is read-only), every ancestor still held, root latch
    /// included, is released before the descent continues.
    pub(crate) fn crabbing_fetch(
        &self,
        page_id: PageId,
        ctx: &mut OpContext<'_>,
        previous: Option<&PagePtr>,
    ) -> Result<PagePtr> {
        let exclusive = ctx.op != OpType::Read;
        let page = self.buffer_pool.fetch_page(page_id)?;
        if exclusive {
            page.latch().write_lock();
        } else {
            page.latch().read_lock();
        }

        let safe = !exclusive || Self::is_safe(&page.read(), ctx.op);
        if previous.is_some() && safe {
            self.free_pages(exclusive, ctx, previous)?;
        }
        if let Some(txn) = ctx.txn.as_mut() {
            txn.page_set_mut().push_back(page.clone());
        }
        Ok(page)
    }

    /// Descend to the leaf responsible for `key` (or the leftmost leaf when
    /// `key` is `None`). Returns `None` on an empty tree. The leaf stays
    /// latched, as does every ancestor not yet proven safe.
    pub(crate) fn find_leaf_page(
        &self,
        key: Option<&K>,
        ctx: &mut OpContext<'_>,
    ) -> Result<Option<PagePtr>> {
        let exclusive = ctx.op != OpType::Read;
        self.lock_root(exclusive, ctx);
        if self.is_empty() {
            self.try_unlock_root(exclusive, ctx);
            return Ok(None);
        }

        let mut page = self.crabbing_fetch(self.root_page_id(), ctx, None)?;
        loop {
            let next = {
                let guard = page.read();
                if header::is_leaf(&guard) {
                    None
                } else {
                    Some(match key {
                        Some(key) => InternalPage::<K>::lookup(&guard, key),
                        None => InternalPage::<K>::value_at(&guard, 0),
                    })
                }
            };
            match next {
                None => return Ok(Some(page)),
                Some(child_id) => {
                    let child = self.crabbing_fetch(child_id, ctx, Some(&page))?;
                    page = child;
                }
            }
        }
    }

    /// Release everything an operation still holds: the root latch, then
    /// every tracked page in descent order (unlatch, unpin, and delete the
    /// ones queued for removal). Without a transaction, releases just `cur`.
    pub(crate) fn free_pages(
        &self,
        exclusive: bool,
        ctx: &mut OpContext<'_>,
        cur: Option<&PagePtr>,
    ) -> Result<()> {
        self.try_unlock_root(exclusive, ctx);

        if let Some(txn) = ctx.txn.as_mut() {
            while let Some(page) = txn.page_set_mut().pop_front() {
                let page_id = page.page_id();
                if exclusive {
                    page.latch().write_unlock();
                } else {
                    page.latch().read_unlock();
                }
                self.buffer_pool.unpin_page(page_id, exclusive)?;
                if txn.deleted_page_set_mut().remove(&page_id) {
                    self.buffer_pool.delete_page(page_id)?;
                }
            }
            debug_assert!(txn.deleted_page_set().is_empty());
        } else if let Some(page) = cur {
            let page_id = page.page_id();
            if exclusive {
                page.latch().write_unlock();
            } else {
                page.latch().read_unlock();
            }
            self.buffer_pool.unpin_page(page_id, false)?;
        }
        Ok(())
    }

    /// Test hook: walk the whole tree checking size bounds, key order, and
    /// the leaf chain. Must only run while no other operation is active.
    pub fn verify_integrity(&self) -> Result<bool> {
        let root_id = self.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(true);
        }
        let subtree_ok = self.check_subtree(root_id, true, None, None)?;
        let chain_ok = self.check_leaf_chain()?;
        Ok(subtree_ok && chain_ok)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        is_root: bool,
        lower: Option<K>,
        upper: Option<K>,
    ) -> Result<bool> {
        let page = self.buffer_pool.fetch_page(page_id)?;
        let mut ok = true;
        let mut children: Vec<(PageId, Option<K>, Option<K>)> = Vec::new();
        {
            let guard = page.read();
            let size = header::size(&guard);
            let max = header::max_size(&guard);

            if header::is_leaf(&guard) {
                if !is_root {
                    ok &= size >= LeafPage::<K>::min_size(&guard) && size <= max;
                }
                for i in 0..size {
                    let k = LeafPage::<K>::key_at(&guard, i);
                    if i > 0 {
                        ok &= LeafPage::<K>::key_at(&guard, i - 1) < k;
                    }
                    if let Some(lo) = lower {
                        ok &= k >= lo;
                    }
                    if let Some(hi) = upper {
                        ok &= k < hi;
                    }
                }
            } else {
                if is_root {
                    ok &= size >= 2;
                } else {
                    ok &= size >= InternalPage::<K>::min_size(&guard) && size <= max;
                }
                for i in 2..size {
                    ok &= InternalPage::<K>::key_at(&guard, i - 1)
                        < InternalPage::<K>::key_at(&guard, i);
                }
                for i in 0..size {
                    let child_lower = if i == 0 {
                        lower
                    } else {
                        Some(InternalPage::<K>::key_at(&guard, i))
                    };
                    let child_upper = if i + 1 < size {
                        Some(InternalPage::<K>::key_at(&guard, i + 1))
                    } else {
                        upper
                    };
                    children.push((
                        InternalPage::<K>::value_at(&guard, i),
                        child_lower,
                        child_upper,
                    ));
                }
            }
        }
        self.buffer_pool.unpin_page(page_id, false)?;

        for (child_id, child_lower, child_upper) in children {
            ok &= self.check_subtree(child_id, false, child_lower, child_upper)?;
        }
        Ok(ok)
    }

    fn check_leaf_chain(&self) -> Result<bool> {
        // Walk down the leftmost spine, then along the sibling links.
        let mut page_id = self.root_page_id();
        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let (leaf, next) = {
                let guard = page.read();
                (
                    header::is_leaf(&guard),
                    InternalPage::<K>::value_at(&guard, 0),
                )
            };
            self.buffer_pool.unpin_page(page_id, false)?;
            if leaf {
                break;
            }
            page_id = next;
        }

        let mut ok = true;
        let mut last_key: Option<K> = None;
        while page_id != INVALID_PAGE_ID {
            let page = self.buffer_pool.fetch_page(page_id)?;
            {
                let guard = page.read();
                for i in 0..header::size(&guard) {
                    let k = LeafPage::<K>::key_at(&guard, i);
                    if let Some(last) = last_key {
                        ok &= last < k;
                    }
                    last_key = Some(k);
                }
                let next = LeafPage::<K>::next_page_id(&guard);
                self.buffer_pool.unpin_page(page_id, false)?;
                page_id = next;
            }
        }
        Ok(ok)
    }
}
