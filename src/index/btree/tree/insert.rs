use crate::common::types::{PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::Result;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::internal::InternalPage;
use crate::index::btree::page::leaf::LeafPage;
use crate::index::btree::page::{self as header};
use crate::index::btree::tree::{BPlusTree, OpContext, OpType};
use crate::transaction::transaction::Transaction;

impl<K: IndexKey> BPlusTree<K> {
    /// Insert a key/RID pair. Returns `false` on a duplicate key (only
    /// unique keys are supported).
    pub fn insert(&self, key: &K, rid: Rid, txn: &mut Transaction) -> Result<bool> {
        let mut ctx = OpContext::new(OpType::Insert, Some(txn));
        loop {
            if self.is_empty() {
                self.lock_root(true, &mut ctx);
                // Re-check: another inserter may have started the tree while
                // we waited for the root latch.
                let started = if self.is_empty() {
                    self.start_new_tree(key, rid)?;
                    true
                } else {
                    false
                };
                self.try_unlock_root(true, &mut ctx);
                if started {
                    return Ok(true);
                }
            }
            // A concurrent remove can empty the tree between the check and
            // the descent; insert_into_leaf reports that as None.
            if let Some(inserted) = self.insert_into_leaf(key, rid, &mut ctx)? {
                return Ok(inserted);
            }
        }
    }

    fn start_new_tree(&self, key: &K, rid: Rid) -> Result<()> {
        let (page, page_id) = self.buffer_pool().new_page()?;
        {
            let mut guard = page.write();
            LeafPage::<K>::init(&mut guard, page_id, INVALID_PAGE_ID, self.leaf_max_size());
            LeafPage::<K>::insert(&mut guard, key, rid);
        }
        self.set_root_page_id(page_id)?;
        self.buffer_pool().unpin_page(page_id, true)?;
        Ok(())
    }

    /// Descend to the target leaf and insert, splitting upward as needed.
    /// `None` means the tree was empty and the caller should retry.
    fn insert_into_leaf(&self, key: &K, rid: Rid, ctx: &mut OpContext<'_>) -> Result<Option<bool>> {
        let Some(leaf) = self.find_leaf_page(Some(key), ctx)? else {
            return Ok(None);
        };

        if LeafPage::<K>::lookup(&leaf.read(), key).is_some() {
            self.free_pages(true, ctx, None)?;
            return Ok(Some(false));
        }

        let overflow = {
            let mut guard = leaf.write();
            let size = LeafPage::<K>::insert(&mut guard, key, rid);
            size > header::max_size(&guard)
        };
        if overflow {
            let new_leaf = self.split_leaf(&leaf, ctx)?;
            let separator = LeafPage::<K>::key_at(&new_leaf.read(), 0);
            self.insert_into_parent(&leaf, separator, &new_leaf, ctx)?;
        }

        self.free_pages(true, ctx, None)?;
        Ok(Some(true))
    }

    /// Allocate a sibling leaf and move the upper half into it. The new
    /// page joins the transaction's page set already write-latched.
    fn split_leaf(&self, node: &PagePtr, ctx: &mut OpContext<'_>) -> Result<PagePtr> {
        let (new_page, new_page_id) = self.buffer_pool().new_page()?;
        new_page.latch().write_lock();
        if let Some(txn) = ctx.txn.as_mut() {
            txn.page_set_mut().push_back(new_page.clone());
        }

        {
            let mut old_guard = node.write();
            let mut new_guard = new_page.write();
            LeafPage::<K>::init(
                &mut new_guard,
                new_page_id,
                header::parent_page_id(&old_guard),
                self.leaf_max_size(),
            );
            LeafPage::<K>::move_half_to(&mut old_guard, &mut new_guard);
        }
        Ok(new_page)
    }

    /// Split an internal node and re-parent the children it hands over
    fn split_internal(&self, node: &PagePtr, ctx: &mut OpContext<'_>) -> Result<PagePtr> {
        let (new_page, new_page_id) = self.buffer_pool().new_page()?;
        new_page.latch().write_lock();
        if let Some(txn) = ctx.txn.as_mut() {
            txn.page_set_mut().push_back(new_page.clone());
        }

        let moved = {
            let mut old_guard = node.write();
            let mut new_guard = new_page.write();
            InternalPage::<K>::init(
                &mut new_guard,
                new_page_id,
                header::parent_page_id(&old_guard),
                self.internal_max_size(),
            );
            InternalPage::<K>::move_half_to(&mut old_guard, &mut new_guard)
        };

        for i in 0..moved {
            let child_id = InternalPage::<K>::value_at(&new_page.read(), i);
            let child = self.buffer_pool().fetch_page(child_id)?;
            header::set_parent_page_id(&mut child.write(), new_page_id);
            self.buffer_pool().unpin_page(child_id, true)?;
        }
        Ok(new_page)
    }

    /// Propagate a split upward: hang `new_node` (with `separator` as its
    /// first key) next to `old_node`, growing a new root when the split
    /// reached the top.
    fn insert_into_parent(
        &self,
        old_node: &PagePtr,
        separator: K,
        new_node: &PagePtr,
        ctx: &mut OpContext<'_>,
    ) -> Result<()> {
        let old_id = old_node.page_id();
        let new_id = new_node.page_id();
        let parent_id = header::parent_page_id(&old_node.read());

        if parent_id == INVALID_PAGE_ID {
            // The root split. Its latch protection is the tree-level root
            // latch, which an unsafe-all-the-way descent still holds.
            let (root_page, root_id) = self.buffer_pool().new_page()?;
            {
                let mut guard = root_page.write();
                InternalPage::<K>::init(
                    &mut guard,
                    root_id,
                    INVALID_PAGE_ID,
                    self.internal_max_size(),
                );
                InternalPage::<K>::populate_new_root(&mut guard, old_id, &separator, new_id);
            }
            header::set_parent_page_id(&mut old_node.write(), root_id);
            header::set_parent_page_id(&mut new_node.write(), root_id);
            self.set_root_page_id(root_id)?;
            self.buffer_pool().unpin_page(root_id, true)?;
            return Ok(());
        }

        // The parent is still write-latched from the descent.
        let parent = self.buffer_pool().fetch_page(parent_id)?;
        header::set_parent_page_id(&mut new_node.write(), parent_id);
        let overflow = {
            let mut guard = parent.write();
            let size = InternalPage::<K>::insert_node_after(&mut guard, old_id, &separator, new_id);
            size > header::max_size(&guard)
        };

        if overflow {
            let new_internal = self.split_internal(&parent, ctx)?;
            let up_separator = InternalPage::<K>::key_at(&new_internal.read(), 0);
            self.insert_into_parent(&parent, up_separator, &new_internal, ctx)?;
        }

        self.buffer_pool().unpin_page(parent_id, true)?;
        Ok(())
    }
}
