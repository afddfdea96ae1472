use config::{cleancache::MAX_POOLS, mm::PAGE_SIZE};
use spin::Once;
use systype::{SysError, SysResult};

use crate::{Mutex, Pool, PoolId, Uuid};

/// Append-only table of pools, one per mounted filesystem instance.
///
/// A slot is published once and never changes afterwards, so lookups go
/// straight to the slot without the registry lock.
pub struct PoolRegistry {
    pools: [Once<Pool>; MAX_POOLS],
    /// Serializes slot allocation.
    lock: Mutex<()>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: core::array::from_fn(|_| Once::new()),
            lock: Mutex::new(()),
        }
    }

    /// Create a private pool for one filesystem instance.
    pub fn create(&self, page_size: usize) -> SysResult<PoolId> {
        check_page_size(page_size)?;
        let _guard = self.lock.lock();
        self.publish(None)
    }

    /// Create or look up the pool shared by every instance carrying `uuid`.
    /// The flag is `true` when this call created the pool.
    pub fn create_shared(&self, uuid: Uuid, page_size: usize) -> SysResult<(PoolId, bool)> {
        check_page_size(page_size)?;
        let _guard = self.lock.lock();
        if let Some(pool) = self.iter().find(|pool| pool.uuid() == Some(&uuid)) {
            log::debug!("[PoolRegistry::create_shared] reuse pool {}", pool.id());
            return Ok((pool.id(), false));
        }
        self.publish(Some(uuid)).map(|id| (id, true))
    }

    /// Must be called with the registry lock held.
    fn publish(&self, uuid: Option<Uuid>) -> SysResult<PoolId> {
        let Some(id) = self.pools.iter().position(|slot| !slot.is_completed()) else {
            log::warn!("[PoolRegistry::publish] all {MAX_POOLS} pools in use");
            return Err(SysError::ENOSPC);
        };
        self.pools[id].call_once(|| Pool::new(id, uuid));
        log::debug!("[PoolRegistry::publish] pool {id} created, shared {}", uuid.is_some());
        Ok(id)
    }

    pub fn get(&self, id: PoolId) -> Option<&Pool> {
        self.pools.get(id).and_then(|slot| slot.get())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter().filter_map(|slot| slot.get())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_page_size(page_size: usize) -> SysResult<()> {
    if page_size != PAGE_SIZE {
        log::warn!("[PoolRegistry] unsupported page size {page_size}");
        return Err(SysError::EINVAL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_numbered_from_zero() {
        let registry = PoolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.create(PAGE_SIZE), Ok(0));
        assert_eq!(registry.create(PAGE_SIZE), Ok(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).map(Pool::id), Some(1));
        assert!(registry.get(2).is_none());
        assert!(registry.get(MAX_POOLS + 7).is_none());
    }

    #[test]
    fn rejects_foreign_page_size() {
        let registry = PoolRegistry::new();
        assert_eq!(registry.create(PAGE_SIZE * 2), Err(SysError::EINVAL));
        assert_eq!(registry.create_shared([1; 16], 512), Err(SysError::EINVAL));
        assert!(registry.is_empty());
    }

    #[test]
    fn limit_reached_after_max_pools() {
        let registry = PoolRegistry::new();
        for id in 0..MAX_POOLS {
            assert_eq!(registry.create(PAGE_SIZE), Ok(id));
        }
        assert_eq!(registry.create(PAGE_SIZE), Err(SysError::ENOSPC));
        assert_eq!(registry.create_shared([9; 16], PAGE_SIZE), Err(SysError::ENOSPC));
    }

    #[test]
    fn shared_pools_are_found_by_uuid() {
        let registry = PoolRegistry::new();
        let (a, created) = registry.create_shared([1; 16], PAGE_SIZE).unwrap();
        assert!(created);
        let private = registry.create(PAGE_SIZE).unwrap();
        let (b, _) = registry.create_shared([2; 16], PAGE_SIZE).unwrap();
        assert_eq!(registry.create_shared([1; 16], PAGE_SIZE), Ok((a, false)));
        assert_ne!(a, b);
        assert_ne!(private, a);
        assert_eq!(registry.len(), 3);
        assert!(registry.get(a).unwrap().is_shared());
        assert!(!registry.get(private).unwrap().is_shared());
    }
}
