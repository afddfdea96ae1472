use alloc::{
    collections::BTreeMap,
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};

use config::{cleancache::DEFAULT_REGION_SLOTS, mm::PAGE_SIZE};
use recycle_allocator::RecycleAllocator;
use spin::Once;
use systype::{SysError, SysResult};

use crate::{EvictHandler, Handle, InodeKey, Mutex, PageIndex, PoolId, RegionBackend};

/// Page store over one contiguous region of fixed-size slots.
///
/// Each stored page gets a fresh 64-bit generation, which is also the
/// handle's `backing`. A handle is only honored while its generation is
/// still live and its slot still holds it, so whichever of load, flush or
/// shrink reaches a slot first frees it and the others see it gone.
pub struct FixedRegion {
    inner: Mutex<RegionInner>,
    handler: Once<Weak<dyn EvictHandler>>,
}

struct RegionInner {
    bytes: Vec<u8>,
    slots: Vec<Option<Handle>>,
    ids: RecycleAllocator,
    /// Live generation to slot, oldest first.
    age: BTreeMap<u64, usize>,
    generation: u64,
}

impl RegionInner {
    /// Free the slot behind `handle` if it still holds exactly that handle.
    fn take(&mut self, handle: &Handle) -> Option<usize> {
        let slot = *self.age.get(&handle.backing)?;
        if self.slots[slot].as_ref() != Some(handle) {
            return None;
        }
        self.slots[slot] = None;
        self.age.remove(&handle.backing);
        self.ids.dealloc(slot);
        Some(slot)
    }

    fn page(&self, slot: usize) -> &[u8] {
        &self.bytes[slot * PAGE_SIZE..(slot + 1) * PAGE_SIZE]
    }

    fn page_mut(&mut self, slot: usize) -> &mut [u8] {
        &mut self.bytes[slot * PAGE_SIZE..(slot + 1) * PAGE_SIZE]
    }
}

impl FixedRegion {
    pub fn new(slots: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegionInner {
                bytes: vec![0; slots * PAGE_SIZE],
                slots: vec![None; slots],
                ids: RecycleAllocator::with_limit(slots),
                age: BTreeMap::new(),
                generation: 0,
            }),
            handler: Once::new(),
        })
    }

    pub fn with_default_slots() -> Arc<Self> {
        Self::new(DEFAULT_REGION_SLOTS)
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn used(&self) -> usize {
        self.inner.lock().ids.in_use()
    }

    /// Reclaim up to `nr` of the oldest slots, telling the registered handler
    /// about each one. Returns how many were reclaimed.
    pub fn shrink(&self, nr: usize) -> usize {
        let handler = self.handler.get().and_then(Weak::upgrade);
        let mut reclaimed = 0;
        while reclaimed < nr {
            let handle = {
                let mut inner = self.inner.lock();
                let Some((_, &slot)) = inner.age.first_key_value() else {
                    break;
                };
                let Some(handle) = inner.slots[slot] else {
                    break;
                };
                inner.take(&handle);
                handle
            };
            log::trace!("[FixedRegion::shrink] reclaim {handle:?}");
            if let Some(handler) = &handler {
                handler.on_evict(handle);
            }
            reclaimed += 1;
        }
        reclaimed
    }
}

impl RegionBackend for FixedRegion {
    fn store(
        &self,
        page: &[u8],
        pool_id: PoolId,
        ino: InodeKey,
        index: PageIndex,
    ) -> SysResult<Handle> {
        if page.len() != PAGE_SIZE {
            return Err(SysError::EINVAL);
        }
        let mut inner = self.inner.lock();
        let slot = inner.ids.alloc().ok_or(SysError::ENOSPC)?;
        inner.generation += 1;
        let generation = inner.generation;
        let handle = Handle {
            pool_id,
            ino,
            index,
            backing: generation,
        };
        inner.page_mut(slot).copy_from_slice(page);
        inner.slots[slot] = Some(handle);
        inner.age.insert(generation, slot);
        Ok(handle)
    }

    fn load(&self, handle: Handle, dest: &mut [u8]) -> SysResult<()> {
        if dest.len() != PAGE_SIZE {
            return Err(SysError::EINVAL);
        }
        let mut inner = self.inner.lock();
        let slot = inner.take(&handle).ok_or(SysError::ENOENT)?;
        dest.copy_from_slice(inner.page(slot));
        Ok(())
    }

    fn flush(&self, handle: Handle) {
        if self.inner.lock().take(&handle).is_none() {
            log::trace!("[FixedRegion::flush] {handle:?} already reclaimed");
        }
    }

    fn register_evict(&self, handler: Weak<dyn EvictHandler>) {
        let mut fresh = false;
        self.handler.call_once(|| {
            fresh = true;
            handler
        });
        if !fresh {
            log::warn!("[FixedRegion::register_evict] handler already set, new one ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    struct Recorder(Mutex<Vec<Handle>>);

    impl EvictHandler for Recorder {
        fn on_evict(&self, handle: Handle) {
            self.0.lock().push(handle);
        }
    }

    fn page(byte: u8) -> Vec<u8> {
        vec![byte; PAGE_SIZE]
    }

    #[test]
    fn load_copies_and_frees() {
        let region = FixedRegion::new(2);
        let handle = region.store(&page(0xab), 0, 7, 3).unwrap();
        assert_eq!((handle.pool_id, handle.ino, handle.index), (0, 7, 3));
        assert_eq!(region.used(), 1);

        let mut dest = page(0);
        region.load(handle, &mut dest).unwrap();
        assert_eq!(dest, page(0xab));
        assert_eq!(region.used(), 0);
        assert_eq!(region.load(handle, &mut dest), Err(SysError::ENOENT));
    }

    #[test]
    fn full_region_refuses_store() {
        let region = FixedRegion::new(1);
        let first = region.store(&page(1), 0, 1, 0).unwrap();
        assert_eq!(region.store(&page(2), 0, 1, 1), Err(SysError::ENOSPC));
        region.flush(first);
        assert!(region.store(&page(2), 0, 1, 1).is_ok());
    }

    #[test]
    fn stale_handle_does_not_touch_reused_slot() {
        let region = FixedRegion::new(1);
        let old = region.store(&page(1), 0, 1, 0).unwrap();
        region.flush(old);
        let new = region.store(&page(2), 0, 1, 0).unwrap();
        assert_ne!(old, new);
        region.flush(old);
        assert_eq!(region.used(), 1);
        let mut dest = page(0);
        region.load(new, &mut dest).unwrap();
        assert_eq!(dest, page(2));
    }

    #[test]
    fn shrink_reclaims_oldest_and_notifies() {
        let region = FixedRegion::new(4);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let weak = Arc::downgrade(&recorder);
        region.register_evict(weak);

        let a = region.store(&page(1), 0, 1, 0).unwrap();
        let b = region.store(&page(2), 0, 1, 1).unwrap();
        let c = region.store(&page(3), 0, 1, 2).unwrap();
        region.flush(a);

        assert_eq!(region.shrink(1), 1);
        assert_eq!(*recorder.0.lock(), [b]);
        assert_eq!(region.shrink(8), 1);
        assert_eq!(*recorder.0.lock(), [b, c]);
        assert_eq!(region.used(), 0);
        assert_eq!(region.capacity(), 4);
    }

    #[test]
    fn generations_past_32_bits_stay_distinct() {
        let region = FixedRegion::new(1);
        region.inner.lock().generation = u32::MAX as u64;
        let old = region.store(&page(1), 0, 1, 0).unwrap();
        region.flush(old);
        let new = region.store(&page(2), 0, 1, 0).unwrap();
        assert!(new.backing > u32::MAX as u64 + 1);
        assert_ne!(old, new);

        region.flush(old);
        assert_eq!(region.used(), 1);
        let mut dest = page(0);
        region.load(new, &mut dest).unwrap();
        assert_eq!(dest, page(2));
    }

    #[test]
    fn second_handler_is_ignored() {
        let region = FixedRegion::new(2);
        let first = Arc::new(Recorder(Mutex::new(Vec::new())));
        let second = Arc::new(Recorder(Mutex::new(Vec::new())));
        let weak: Weak<Recorder> = Arc::downgrade(&first);
        region.register_evict(weak);
        let weak: Weak<Recorder> = Arc::downgrade(&second);
        region.register_evict(weak);

        let handle = region.store(&page(1), 0, 1, 0).unwrap();
        assert_eq!(region.shrink(1), 1);
        assert_eq!(*first.0.lock(), [handle]);
        assert!(second.0.lock().is_empty());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let region = FixedRegion::with_default_slots();
        assert_eq!(region.capacity(), DEFAULT_REGION_SLOTS);
        assert_eq!(region.store(&[1; 10], 0, 1, 0), Err(SysError::EINVAL));
        let handle = region.store(&page(1), 0, 1, 0).unwrap();
        let mut short = [0u8; 10];
        assert_eq!(region.load(handle, &mut short), Err(SysError::EINVAL));
        assert_eq!(region.used(), 1);
    }
}
