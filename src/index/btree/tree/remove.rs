use crate::common::types::{PagePtr, INVALID_PAGE_ID};
use crate::index::btree::error::Result;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::internal::InternalPage;
use crate::index::btree::page::leaf::LeafPage;
use crate::index::btree::page::{self as header};
use crate::index::btree::tree::{BPlusTree, OpContext, OpType};
use crate::transaction::transaction::Transaction;

impl<K: IndexKey> BPlusTree<K> {
    /// Delete a key (and its RID) if present
    pub fn remove(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        let mut ctx = OpContext::new(OpType::Delete, Some(txn));
        let Some(leaf) = self.find_leaf_page(Some(key), &mut ctx)? else {
            return Ok(());
        };

        let underflow = {
            let mut guard = leaf.write();
            let size = LeafPage::<K>::remove(&mut guard, key);
            size < LeafPage::<K>::min_size(&guard)
        };
        if underflow {
            self.coalesce_or_redistribute(&leaf, &mut ctx)?;
        }
        self.free_pages(true, &mut ctx, None)
    }

    /// Fix an underflowed node by merging with or borrowing from a sibling.
    /// Returns true when `node` was emptied and queued for deletion.
    fn coalesce_or_redistribute(&self, node: &PagePtr, ctx: &mut OpContext<'_>) -> Result<bool> {
        let (node_id, parent_id, node_is_leaf, node_size, node_max) = {
            let guard = node.read();
            (
                guard.page_id,
                header::parent_page_id(&guard),
                header::is_leaf(&guard),
                header::size(&guard),
                header::max_size(&guard),
            )
        };

        if parent_id == INVALID_PAGE_ID {
            let delete_root = self.adjust_root(node)?;
            if delete_root {
                if let Some(txn) = ctx.txn.as_mut() {
                    txn.deleted_page_set_mut().insert(node_id);
                }
            }
            return Ok(delete_root);
        }

        // Pick a sibling: the left neighbor by default, the right one when
        // this node is its parent's leftmost child.
        let parent = self.buffer_pool().fetch_page(parent_id)?;
        let (node_index, sibling_id, sibling_is_right) = {
            let guard = parent.read();
            let index = InternalPage::<K>::value_index(&guard, node_id)
                .expect("underflowed node missing from its parent page");
            let (sibling_index, is_right) = if index == 0 { (1, true) } else { (index - 1, false) };
            (
                index,
                InternalPage::<K>::value_at(&guard, sibling_index),
                is_right,
            )
        };
        let sibling = self.crabbing_fetch(sibling_id, ctx, None)?;
        let sibling_size = header::size(&sibling.read());

        // Leaves coalesce only below max_size; internal pages also coalesce
        // at exactly max_size because slot 0 is a sentinel.
        let fits = if node_is_leaf {
            node_size + sibling_size < node_max
        } else {
            node_size + sibling_size <= node_max
        };

        let result = if fits {
            let (earlier, later) = if sibling_is_right {
                (node, &sibling)
            } else {
                (&sibling, node)
            };
            self.coalesce(earlier, later, &parent, ctx)?;
            true
        } else {
            self.redistribute(&sibling, node, node_index, sibling_is_right, &parent)?;
            false
        };
        self.buffer_pool().unpin_page(parent_id, true)?;
        Ok(result)
    }

    /// Merge `later` into `earlier` (its left neighbor), drop the separator
    /// from the parent, and recurse if the parent underflowed.
    fn coalesce(
        &self,
        earlier: &PagePtr,
        later: &PagePtr,
        parent: &PagePtr,
        ctx: &mut OpContext<'_>,
    ) -> Result<()> {
        let earlier_id = earlier.page_id();
        let later_id = later.page_id();
        let remove_index = InternalPage::<K>::value_index(&parent.read(), later_id)
            .expect("merged node missing from its parent page");

        if header::is_leaf(&later.read()) {
            let mut earlier_guard = earlier.write();
            let mut later_guard = later.write();
            LeafPage::<K>::move_all_to(&mut later_guard, &mut earlier_guard);
        } else {
            let separator = InternalPage::<K>::key_at(&parent.read(), remove_index);
            let moved_start = {
                let mut earlier_guard = earlier.write();
                let mut later_guard = later.write();
                let start = header::size(&earlier_guard);
                InternalPage::<K>::move_all_to(&mut later_guard, &mut earlier_guard, &separator);
                start
            };
            // The moved subtrees now hang under `earlier`.
            let total = header::size(&earlier.read());
            for i in moved_start..total {
                let child_id = InternalPage::<K>::value_at(&earlier.read(), i);
                let child = self.buffer_pool().fetch_page(child_id)?;
                header::set_parent_page_id(&mut child.write(), earlier_id);
                self.buffer_pool().unpin_page(child_id, true)?;
            }
        }

        InternalPage::<K>::remove(&mut parent.write(), remove_index);
        if let Some(txn) = ctx.txn.as_mut() {
            txn.deleted_page_set_mut().insert(later_id);
        }

        let parent_needs_fix = {
            let guard = parent.read();
            let size = header::size(&guard);
            if header::parent_page_id(&guard) == INVALID_PAGE_ID {
                // A root shrunk to one child must be collapsed.
                size == 1
            } else {
                size < InternalPage::<K>::min_size(&guard)
            }
        };
        if parent_needs_fix {
            self.coalesce_or_redistribute(parent, ctx)?;
        }
        Ok(())
    }

    /// Borrow one entry from the sibling and patch the separator in the
    /// parent. Never propagates further up.
    fn redistribute(
        &self,
        sibling: &PagePtr,
        node: &PagePtr,
        node_index: i32,
        sibling_is_right: bool,
        parent: &PagePtr,
    ) -> Result<()> {
        let node_id = node.page_id();

        if header::is_leaf(&node.read()) {
            if sibling_is_right {
                // Sibling's first entry moves to our end; its new first key
                // becomes the separator.
                let (key, rid) = {
                    let mut guard = sibling.write();
                    LeafPage::<K>::remove_at(&mut guard, 0)
                };
                LeafPage::<K>::push_back(&mut node.write(), &key, rid);
                let new_separator = LeafPage::<K>::key_at(&sibling.read(), 0);
                InternalPage::<K>::set_key_at(&mut parent.write(), node_index + 1, &new_separator);
            } else {
                // Sibling's last entry moves to our front; we become the
                // right-hand node of the separator.
                let (key, rid) = {
                    let mut guard = sibling.write();
                    let last = header::size(&guard) - 1;
                    LeafPage::<K>::remove_at(&mut guard, last)
                };
                LeafPage::<K>::insert_front(&mut node.write(), &key, rid);
                InternalPage::<K>::set_key_at(&mut parent.write(), node_index, &key);
            }
            return Ok(());
        }

        if sibling_is_right {
            let separator_index = node_index + 1;
            let old_separator = InternalPage::<K>::key_at(&parent.read(), separator_index);
            let (moved_child, new_separator) = {
                let guard = sibling.read();
                (
                    InternalPage::<K>::value_at(&guard, 0),
                    InternalPage::<K>::key_at(&guard, 1),
                )
            };
            InternalPage::<K>::remove(&mut sibling.write(), 0);
            InternalPage::<K>::push_back(&mut node.write(), &old_separator, moved_child);
            InternalPage::<K>::set_key_at(&mut parent.write(), separator_index, &new_separator);

            let child = self.buffer_pool().fetch_page(moved_child)?;
            header::set_parent_page_id(&mut child.write(), node_id);
            self.buffer_pool().unpin_page(moved_child, true)?;
        } else {
            let separator_index = node_index;
            let old_separator = InternalPage::<K>::key_at(&parent.read(), separator_index);
            let (moved_key, moved_child) = {
                let guard = sibling.read();
                let last = header::size(&guard) - 1;
                (
                    InternalPage::<K>::key_at(&guard, last),
                    InternalPage::<K>::value_at(&guard, last),
                )
            };
            {
                let mut guard = sibling.write();
                let last = header::size(&guard) - 1;
                InternalPage::<K>::remove(&mut guard, last);
            }
            InternalPage::<K>::insert_front(&mut node.write(), moved_child, &old_separator);
            InternalPage::<K>::set_key_at(&mut parent.write(), separator_index, &moved_key);

            let child = self.buffer_pool().fetch_page(moved_child)?;
            header::set_parent_page_id(&mut child.write(), node_id);
            self.buffer_pool().unpin_page(moved_child, true)?;
        }
        Ok(())
    }

    /// Handle underflow at the root: an empty leaf root ends the tree; an
    /// internal root with a single child hands the root role down.
    fn adjust_root(&self, root: &PagePtr) -> Result<bool> {
        let (is_leaf, size) = {
            let guard = root.read();
            (header::is_leaf(&guard), header::size(&guard))
        };

        if is_leaf {
            if size == 0 {
                self.set_root_page_id(INVALID_PAGE_ID)?;
                return Ok(true);
            }
            return Ok(false);
        }

        if size == 1 {
            let new_root_id = InternalPage::<K>::remove_and_return_only_child(&mut root.write());
            self.set_root_page_id(new_root_id)?;

            let child = self.buffer_pool().fetch_page(new_root_id)?;
            header::set_parent_page_id(&mut child.write(), INVALID_PAGE_ID);
            self.buffer_pool().unpin_page(new_root_id, true)?;
            return Ok(true);
        }
        Ok(false)
    }
}
