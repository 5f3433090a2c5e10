use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;

use crate::common::types::{PagePtr, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::Result;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::leaf::LeafPage;
use crate::index::btree::page::{self as header};
use crate::index::btree::tree::{BPlusTree, OpContext, OpType};
use crate::storage::buffer::BufferPoolManager;

/// Forward range scan over the leaf chain.
///
/// The iterator owns a read latch and a pin on the current leaf for its
/// whole lifetime; both move to the next leaf on overflow and are released
/// when the iterator is dropped. Restart a scan by asking the tree for a
/// fresh iterator.
pub struct TreeIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    leaf: Option<PagePtr>,
    index: i32,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> TreeIterator<K> {
    pub(crate) fn new(buffer_pool: Arc<BufferPoolManager>, leaf: Option<PagePtr>, index: i32) -> Self {
        let mut iter = Self {
            buffer_pool,
            leaf,
            index,
            _marker: PhantomData,
        };
        // A start position past the leaf's last key (or an empty leaf)
        // rolls forward immediately.
        iter.advance_past_exhausted_leaf();
        iter
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    fn advance_past_exhausted_leaf(&mut self) {
        loop {
            let position = match self.leaf.as_ref() {
                None => break,
                Some(leaf) => {
                    let guard = leaf.read();
                    (header::size(&guard), LeafPage::<K>::next_page_id(&guard))
                }
            };
            let (size, next) = position;
            if self.index < size {
                break;
            }

            self.release_current();
            if next == INVALID_PAGE_ID {
                break;
            }
            match self.buffer_pool.fetch_page(next) {
                Ok(page) => {
                    page.latch().read_lock();
                    self.leaf = Some(page);
                    self.index = 0;
                }
                Err(e) => {
                    // End the scan rather than panic inside an iterator.
                    warn!("range scan lost leaf {}: {}", next, e);
                    break;
                }
            }
        }
    }

    fn release_current(&mut self) {
        if let Some(leaf) = self.leaf.take() {
            let page_id = leaf.page_id();
            leaf.latch().read_unlock();
            if let Err(e) = self.buffer_pool.unpin_page(page_id, false) {
                warn!("range scan failed to unpin leaf {}: {}", page_id, e);
            }
        }
    }
}

impl<K: IndexKey> Iterator for TreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        let leaf = self.leaf.as_ref()?;
        let item = {
            let guard = leaf.read();
            (
                LeafPage::<K>::key_at(&guard, self.index),
                LeafPage::<K>::rid_at(&guard, self.index),
            )
        };
        self.index += 1;
        self.advance_past_exhausted_leaf();
        Some(item)
    }
}

impl<K: IndexKey> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        self.release_current();
    }
}

impl<K: IndexKey> BPlusTree<K> {
    /// Scan from the smallest key
    pub fn iter(&self) -> Result<TreeIterator<K>> {
        let mut ctx = OpContext::new(OpType::Read, None);
        let leaf = self.find_leaf_page(None, &mut ctx)?;
        self.try_unlock_root(false, &mut ctx);
        Ok(TreeIterator::new(self.buffer_pool().clone(), leaf, 0))
    }

    /// Scan from the first key >= `key`
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>> {
        let mut ctx = OpContext::new(OpType::Read, None);
        let leaf = self.find_leaf_page(Some(key), &mut ctx)?;
        self.try_unlock_root(false, &mut ctx);
        match leaf {
            None => Ok(TreeIterator::new(self.buffer_pool().clone(), None, 0)),
            Some(page) => {
                let index = LeafPage::<K>::key_index(&page.read(), key);
                Ok(TreeIterator::new(
                    self.buffer_pool().clone(),
                    Some(page),
                    index,
                ))
            }
        }
    }
}
