use alloc::sync::Weak;

use systype::SysResult;

use crate::{Handle, InodeKey, PageIndex, PoolId};

/// Fixed-region physical page store holding the bytes of cached pages.
///
/// Implementations must not hold any internal lock while calling
/// [`EvictHandler::on_evict`]: the handler takes index locks, and the index
/// calls back into the backend while holding them.
pub trait RegionBackend: Send + Sync {
    /// Copy `page` into a free slot tagged with the given coordinates.
    fn store(
        &self,
        page: &[u8],
        pool_id: PoolId,
        ino: InodeKey,
        index: PageIndex,
    ) -> SysResult<Handle>;

    /// Copy the slot behind `handle` into `dest` and free the slot.
    fn load(&self, handle: Handle, dest: &mut [u8]) -> SysResult<()>;

    /// Free the slot behind `handle` without copying.
    fn flush(&self, handle: Handle);

    /// Register who to tell when a slot is reclaimed out of band.
    fn register_evict(&self, handler: Weak<dyn EvictHandler>);
}

/// Receiver of out-of-band slot reclaims.
pub trait EvictHandler: Send + Sync {
    /// Called on an arbitrary thread after the backend freed the slot behind
    /// `handle`. The index entry pointing at it, if any, must go.
    fn on_evict(&self, handle: Handle);
}
