use alloc::sync::{Arc, Weak};
use config::mm::PAGE_SIZE;
use systype::{SysError, SysResult};

use crate::{
    is_zero_page,
    stats::{dec, inc},
    CachedPage, CleancacheStats, EvictHandler, Handle, InodeKey, PageIndex, PageMap, Pool,
    PoolId, PoolRegistry, RegionBackend, StatsSnapshot, Uuid,
};

/// Occupancy of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInfo {
    pub id: PoolId,
    pub shared: bool,
    /// Index nodes linked in the pool tree.
    pub nodes: usize,
    /// Entries across those nodes.
    pub pages: usize,
}

/// Operations reclaim and invalidation paths call into.
///
/// Every failure degrades to "not cached": a failed store leaves nothing
/// behind and a failed load is a miss, so callers can always fall back to
/// the real file.
pub struct Cleancache {
    registry: PoolRegistry,
    region: Arc<dyn RegionBackend>,
    stats: CleancacheStats,
}

impl Cleancache {
    /// Build the cache over `region` and register it as the region's
    /// eviction handler.
    pub fn new(region: Arc<dyn RegionBackend>) -> Arc<Self> {
        let cache = Arc::new(Self {
            registry: PoolRegistry::new(),
            region,
            stats: CleancacheStats::new(),
        });
        let handler: Weak<Cleancache> = Arc::downgrade(&cache);
        cache.region.register_evict(handler);
        cache
    }

    /// Create a pool for a newly mounted filesystem instance.
    pub fn init(&self, page_size: usize) -> SysResult<PoolId> {
        let id = self.registry.create(page_size)?;
        inc(&self.stats.pools);
        Ok(id)
    }

    /// Create or join the pool of a clustered filesystem identified by
    /// `uuid`.
    pub fn init_shared(&self, uuid: Uuid, page_size: usize) -> SysResult<PoolId> {
        let (id, created) = self.registry.create_shared(uuid, page_size)?;
        if created {
            inc(&self.stats.pools);
        }
        Ok(id)
    }

    fn pool(&self, pool_id: PoolId) -> SysResult<&Pool> {
        self.registry.get(pool_id).ok_or_else(|| {
            log::warn!("[Cleancache] no pool {pool_id}");
            SysError::EINVAL
        })
    }

    /// Offer a clean page that reclaim is about to drop.
    ///
    /// Best effort: the caller may ignore the result, a failed store simply
    /// leaves the page uncached.
    pub fn store(
        &self,
        pool_id: PoolId,
        ino: InodeKey,
        index: PageIndex,
        page: &[u8],
    ) -> SysResult<()> {
        inc(&self.stats.stores);
        let ret = self.do_store(pool_id, ino, index, page);
        match ret {
            Ok(()) => inc(&self.stats.store_hits),
            Err(_) => inc(&self.stats.store_failures),
        }
        ret
    }

    fn do_store(
        &self,
        pool_id: PoolId,
        ino: InodeKey,
        index: PageIndex,
        page: &[u8],
    ) -> SysResult<()> {
        let pool = self.pool(pool_id)?;
        if page.len() != PAGE_SIZE {
            log::warn!("[Cleancache::store] page of {} bytes", page.len());
            return Err(SysError::EINVAL);
        }
        let entry = if is_zero_page(page) {
            CachedPage::Zero
        } else {
            let handle = self
                .region
                .store(page, pool_id, ino, index)
                .map_err(|err| {
                    log::trace!("[Cleancache::store] region refused ino {ino} idx {index}: {err}");
                    err
                })?;
            CachedPage::Stored(handle)
        };
        self.insert_entry(pool, ino, index, entry, |pages| {
            pages.try_reserve(1).is_ok()
        })
    }

    /// Link `entry` at `index`, displacing whatever was there. `reserve`
    /// makes room in the map; when it fails the store is rolled back and
    /// `entry` is released without ever being accounted.
    fn insert_entry<R>(
        &self,
        pool: &Pool,
        ino: InodeKey,
        index: PageIndex,
        entry: CachedPage,
        reserve: R,
    ) -> SysResult<()>
    where
        R: FnOnce(&mut PageMap) -> bool,
    {
        let node = pool.insert_if_absent(ino);
        let mut pages = node.lock();
        if let Some(old) = pages.remove(&index) {
            log::trace!("[Cleancache::store] displace ino {ino} idx {index}");
            inc(&self.stats.duplicates);
            self.release(old);
        }
        if !reserve(&mut *pages) {
            let empty = pages.is_empty();
            drop(pages);
            if empty {
                pool.isolate_if_empty(&node);
            }
            if let CachedPage::Stored(handle) = entry {
                self.region.flush(handle);
            }
            log::warn!("[Cleancache::store] no memory for ino {ino} idx {index}");
            return Err(SysError::ENOMEM);
        }
        pages.insert(index, entry);
        inc(&self.stats.cached_pages);
        if entry.is_zero() {
            inc(&self.stats.zero_pages);
        }
        log::trace!(
            "[Cleancache::store] pool {} ino {ino} idx {index} zero {}",
            pool.id(),
            entry.is_zero()
        );
        Ok(())
    }

    /// Serve a previously stored page into `dest`. Entries are single use:
    /// a hit removes the entry.
    ///
    /// Returns `Err(ENOENT)` on a miss.
    pub fn load(
        &self,
        pool_id: PoolId,
        ino: InodeKey,
        index: PageIndex,
        dest: &mut [u8],
    ) -> SysResult<()> {
        inc(&self.stats.loads);
        let pool = self.pool(pool_id)?;
        if dest.len() != PAGE_SIZE {
            log::warn!("[Cleancache::load] buffer of {} bytes", dest.len());
            return Err(SysError::EINVAL);
        }
        let page = self
            .take_entry(pool, ino, index, |_| true)
            .ok_or(SysError::ENOENT)?;
        match page {
            CachedPage::Zero => dest.fill(0),
            CachedPage::Stored(handle) => self.region.load(handle, dest).map_err(|err| {
                log::trace!("[Cleancache::load] {handle:?} unusable: {err}");
                err
            })?,
        }
        inc(&self.stats.load_hits);
        log::trace!("[Cleancache::load] hit pool {pool_id} ino {ino} idx {index}");
        Ok(())
    }

    /// Drop one entry, if present.
    pub fn flush_page(&self, pool_id: PoolId, ino: InodeKey, index: PageIndex) {
        inc(&self.stats.flush_pages);
        let Ok(pool) = self.pool(pool_id) else {
            return;
        };
        if let Some(page) = self.take_entry(pool, ino, index, |_| true) {
            if let CachedPage::Stored(handle) = page {
                self.region.flush(handle);
            }
            inc(&self.stats.flush_page_hits);
        }
    }

    /// Drop every entry of one inode.
    pub fn flush_inode(&self, pool_id: PoolId, ino: InodeKey) {
        inc(&self.stats.flush_inodes);
        let Ok(pool) = self.pool(pool_id) else {
            return;
        };
        if let Some(flushed) = pool.flush_inode(ino, |_, page| self.release(page)) {
            inc(&self.stats.flush_inode_hits);
            log::trace!("[Cleancache::flush_inode] pool {pool_id} ino {ino} dropped {flushed}");
        }
    }

    /// Drop every entry of one pool. The pool itself stays registered.
    pub fn flush_pool(&self, pool_id: PoolId) {
        inc(&self.stats.flush_pools);
        let Ok(pool) = self.pool(pool_id) else {
            return;
        };
        let nodes = pool.flush_all(|_, page| self.release(page));
        if nodes > 0 {
            inc(&self.stats.flush_pool_hits);
        }
        log::debug!("[Cleancache::flush_pool] pool {pool_id} flushed {nodes} inodes");
    }

    pub fn pool_info(&self, pool_id: PoolId) -> SysResult<PoolInfo> {
        let pool = self.pool(pool_id)?;
        Ok(PoolInfo {
            id: pool.id(),
            shared: pool.is_shared(),
            nodes: pool.node_count(),
            pages: pool.page_count(),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// Remove the entry at `index` if `pred` accepts it, then try to isolate
    /// the node if that left it empty.
    fn take_entry<F>(
        &self,
        pool: &Pool,
        ino: InodeKey,
        index: PageIndex,
        pred: F,
    ) -> Option<CachedPage>
    where
        F: FnOnce(&CachedPage) -> bool,
    {
        let node = pool.find_and_ref(ino)?;
        let (page, empty) = {
            let mut pages = node.lock();
            let page = if pages.get(&index).is_some_and(pred) {
                pages.remove(&index)
            } else {
                None
            };
            if let Some(page) = &page {
                self.forget(page);
            }
            (page, pages.is_empty())
        };
        if empty {
            pool.isolate_if_empty(&node);
        }
        page
    }

    /// Account for an entry leaving the index. Called under the node lock.
    fn forget(&self, page: &CachedPage) {
        dec(&self.stats.cached_pages);
        if page.is_zero() {
            dec(&self.stats.zero_pages);
        }
    }

    /// Account for an entry leaving the index and free its storage.
    fn release(&self, page: CachedPage) {
        self.forget(&page);
        if let CachedPage::Stored(handle) = page {
            self.region.flush(handle);
        }
    }
}

impl EvictHandler for Cleancache {
    fn on_evict(&self, handle: Handle) {
        inc(&self.stats.evicts);
        let Some(pool) = self.registry.get(handle.pool_id) else {
            log::warn!("[Cleancache::on_evict] {handle:?} names no pool");
            return;
        };
        let target = CachedPage::Stored(handle);
        if self
            .take_entry(pool, handle.ino, handle.index, |page| *page == target)
            .is_some()
        {
            inc(&self.stats.evict_hits);
            inc(&self.stats.evicted_pages);
        } else {
            log::trace!("[Cleancache::on_evict] {handle:?} already gone");
        }
    }
}
