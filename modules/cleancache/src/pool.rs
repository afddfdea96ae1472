use alloc::{collections::BTreeMap, sync::Arc};

use config::cleancache::FLUSH_BATCH;
use spin::{MutexGuard, RwLockWriteGuard};

use crate::{CachedPage, IndexNode, InodeKey, NodeRef, PageIndex, PageMap, PoolId, RwLock, Uuid};

/// Inode key to index node, ordered so bulk flushes walk in key order.
pub type InodeTree = BTreeMap<InodeKey, Arc<IndexNode>>;

/// Per filesystem instance index root.
///
/// Lock order is always tree lock before node lock. Paths that only read the
/// tree release it before locking a node, relying on their node reference to
/// keep the node from being isolated.
pub struct Pool {
    id: PoolId,
    uuid: Option<Uuid>,
    tree: RwLock<InodeTree>,
}

impl Pool {
    pub(crate) fn new(id: PoolId, uuid: Option<Uuid>) -> Self {
        Self {
            id,
            uuid,
            tree: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn uuid(&self) -> Option<&Uuid> {
        self.uuid.as_ref()
    }

    pub fn is_shared(&self) -> bool {
        self.uuid.is_some()
    }

    /// Look up a node without taking a reference. The node may be isolated
    /// as soon as the read lock is dropped.
    pub fn find(&self, ino: InodeKey) -> Option<Arc<IndexNode>> {
        self.tree.read().get(&ino).cloned()
    }

    /// Look up a node and take a reference while still under the read lock.
    pub fn find_and_ref(&self, ino: InodeKey) -> Option<NodeRef> {
        self.tree.read().get(&ino).map(|node| node.get())
    }

    /// Return the node for `ino`, creating it if needed, with a reference
    /// held for the caller.
    pub fn insert_if_absent(&self, ino: InodeKey) -> NodeRef {
        if let Some(node) = self.find_and_ref(ino) {
            return node;
        }
        let candidate = IndexNode::new_arc(ino);
        let mut tree = self.tree.write();
        if let Some(node) = tree.get(&ino) {
            log::trace!("[Pool::insert_if_absent] pool {} ino {ino} lost creation race", self.id);
            return node.get();
        }
        let node = candidate.get();
        tree.insert(ino, candidate);
        node
    }

    /// Remove `node` from the tree and drop the tree's reference, but only
    /// if the caller's reference is the only other one and the map is empty.
    ///
    /// The guards prove the tree write lock and the node lock are held.
    pub fn try_isolate(
        tree: &mut RwLockWriteGuard<'_, InodeTree>,
        node: &IndexNode,
        pages: &MutexGuard<'_, PageMap>,
    ) -> bool {
        if node.refcnt() != 2 || !pages.is_empty() {
            return false;
        }
        match tree.get(&node.ino()) {
            Some(linked) if core::ptr::eq(Arc::as_ptr(linked), node) => {}
            _ => return false,
        }
        tree.remove(&node.ino());
        node.put_tree_ref();
        true
    }

    /// Take the locks in order and isolate `node` if it is empty and nobody
    /// else holds it.
    pub fn isolate_if_empty(&self, node: &NodeRef) -> bool {
        let mut tree = self.tree.write();
        let pages = node.lock();
        Self::try_isolate(&mut tree, node, &pages)
    }

    /// Release every entry of `ino` and isolate its node. Returns the number
    /// of entries released, or `None` if the inode has no node.
    ///
    /// The tree stays write locked throughout so no page of this inode can
    /// be inserted concurrently.
    pub fn flush_inode<F>(&self, ino: InodeKey, mut release: F) -> Option<usize>
    where
        F: FnMut(PageIndex, CachedPage),
    {
        let mut tree = self.tree.write();
        let node = tree.get(&ino)?.get();
        let mut pages = node.lock();
        let flushed = flush_pages_locked(&mut pages, &mut release);
        if !Self::try_isolate(&mut tree, &node, &pages) {
            log::trace!("[Pool::flush_inode] ino {ino} still referenced, left for its holder");
        }
        Some(flushed)
    }

    /// Flush and isolate every node in key order. Returns the number of
    /// nodes visited.
    pub fn flush_all<F>(&self, mut release: F) -> usize
    where
        F: FnMut(PageIndex, CachedPage),
    {
        let mut tree = self.tree.write();
        let mut cursor = Some(0);
        let mut visited = 0;
        while let Some(start) = cursor {
            let Some(node) = tree.range(start..).next().map(|(_, node)| node.get()) else {
                break;
            };
            cursor = node.ino().checked_add(1);
            let mut pages = node.lock();
            flush_pages_locked(&mut pages, &mut release);
            Self::try_isolate(&mut tree, &node, &pages);
            visited += 1;
        }
        visited
    }

    pub fn node_count(&self) -> usize {
        self.tree.read().len()
    }

    pub fn page_count(&self) -> usize {
        self.tree.read().values().map(|node| node.len()).sum()
    }
}

/// Drain `pages` in batches of at most `FLUSH_BATCH` entries.
fn flush_pages_locked<F>(pages: &mut PageMap, release: &mut F) -> usize
where
    F: FnMut(PageIndex, CachedPage),
{
    let mut batch = [0 as PageIndex; FLUSH_BATCH];
    let mut flushed = 0;
    loop {
        let mut n = 0;
        for (slot, &index) in batch.iter_mut().zip(pages.keys()) {
            *slot = index;
            n += 1;
        }
        if n == 0 {
            break;
        }
        for index in &batch[..n] {
            if let Some(page) = pages.remove(index) {
                release(*index, page);
                flushed += 1;
            }
        }
    }
    assert!(pages.is_empty(), "index node not empty after flush");
    flushed
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn fill(pool: &Pool, ino: InodeKey, indices: impl IntoIterator<Item = PageIndex>) {
        let node = pool.insert_if_absent(ino);
        let mut pages = node.lock();
        for index in indices {
            pages.insert(index, CachedPage::Zero);
        }
    }

    #[test]
    fn insert_if_absent_reuses_existing_node() {
        let pool = Pool::new(0, None);
        let a = pool.insert_if_absent(9);
        let b = pool.insert_if_absent(9);
        assert_eq!(pool.node_count(), 1);
        // tree + a + b
        assert_eq!(a.refcnt(), 3);
        drop(b);
        assert_eq!(a.refcnt(), 2);
    }

    #[test]
    fn isolation_requires_empty_map() {
        let pool = Pool::new(0, None);
        fill(&pool, 1, 0..1);
        let node = pool.find_and_ref(1).unwrap();
        assert!(!pool.isolate_if_empty(&node));
        node.lock().clear();
        assert!(pool.isolate_if_empty(&node));
        assert_eq!(pool.node_count(), 0);
        assert!(pool.find(1).is_none());
        assert_eq!(node.refcnt(), 1);
    }

    #[test]
    fn isolation_refused_while_another_holder_exists() {
        let pool = Pool::new(0, None);
        let node = pool.insert_if_absent(2);
        let other = pool.find_and_ref(2).unwrap();
        assert!(!pool.isolate_if_empty(&node));
        drop(other);
        assert!(pool.isolate_if_empty(&node));
    }

    #[test]
    fn flush_inode_releases_in_batches_and_isolates() {
        let pool = Pool::new(0, None);
        let total = (FLUSH_BATCH * 3 + 5) as PageIndex;
        fill(&pool, 4, 0..total);
        fill(&pool, 5, 0..2);

        let mut released = Vec::new();
        let flushed = pool.flush_inode(4, |index, _| released.push(index));
        assert_eq!(flushed, Some(total as usize));
        released.sort_unstable();
        assert_eq!(released, (0..total).collect::<Vec<_>>());
        assert!(pool.find(4).is_none());
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.flush_inode(4, |_, _| {}), None);
    }

    #[test]
    fn flush_inode_leaves_referenced_node_linked() {
        let pool = Pool::new(0, None);
        fill(&pool, 6, 0..3);
        let holder = pool.find_and_ref(6).unwrap();
        assert_eq!(pool.flush_inode(6, |_, _| {}), Some(3));
        assert_eq!(pool.node_count(), 1);
        assert!(holder.is_empty());
        assert!(pool.isolate_if_empty(&holder));
        assert_eq!(pool.node_count(), 0);
    }

    #[test]
    fn flush_all_walks_in_key_order() {
        let pool = Pool::new(0, None);
        for ino in [30, 10, 20, InodeKey::MAX] {
            // Page index doubles as a tag naming its inode.
            fill(&pool, ino, [ino]);
        }
        let mut order = Vec::new();
        assert_eq!(pool.flush_all(|index, _| order.push(index)), 4);
        assert_eq!(order, [10, 20, 30, InodeKey::MAX]);
        assert_eq!(pool.node_count(), 0);
        assert_eq!(pool.flush_all(|_, _| {}), 0);
    }
}
