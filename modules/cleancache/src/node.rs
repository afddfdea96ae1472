use alloc::sync::Arc;
use core::{
    ops::Deref,
    sync::atomic::{AtomicUsize, Ordering},
};

use hashbrown::HashMap;
use spin::MutexGuard;

use crate::{CachedPage, InodeKey, Mutex, PageIndex};

pub type PageMap = HashMap<PageIndex, CachedPage>;

/// Per-inode sparse map of cached pages.
///
/// `refcnt` counts the pool tree's reference plus one per in-flight
/// operation. The node may only leave its tree when that count is exactly
/// two (tree + remover) and the map is empty, see [`crate::Pool::try_isolate`].
pub struct IndexNode {
    ino: InodeKey,
    refcnt: AtomicUsize,
    pages: Mutex<PageMap>,
}

impl IndexNode {
    /// Create a node already holding the tree's reference.
    pub(crate) fn new_arc(ino: InodeKey) -> Arc<Self> {
        Arc::new(Self {
            ino,
            refcnt: AtomicUsize::new(1),
            pages: Mutex::new(HashMap::new()),
        })
    }

    pub fn ino(&self) -> InodeKey {
        self.ino
    }

    pub fn refcnt(&self) -> usize {
        self.refcnt.load(Ordering::Acquire)
    }

    /// Take a temporary reference.
    ///
    /// Callers must hold the pool lock (read or write) or an existing
    /// reference, otherwise the node may be isolated concurrently.
    pub fn get(self: &Arc<Self>) -> NodeRef {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
        NodeRef(self.clone())
    }

    /// Drop the tree's reference. Only isolation calls this.
    pub(crate) fn put_tree_ref(&self) {
        let old = self.refcnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old >= 2, "tree reference of ino {} underflow", self.ino);
    }

    pub fn lock(&self) -> MutexGuard<'_, PageMap> {
        self.pages.lock()
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

/// A counted temporary reference to an [`IndexNode`], released on drop.
pub struct NodeRef(Arc<IndexNode>);

impl Deref for NodeRef {
    type Target = IndexNode;

    fn deref(&self) -> &IndexNode {
        &self.0
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        let old = self.0.refcnt.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old >= 1);
    }
}
