use crate::{InodeKey, PageIndex, PoolId};

/// Token for one page stored in the region backend.
///
/// It carries its own index coordinates so an eviction can find the entry
/// pointing at it without a reverse map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub pool_id: PoolId,
    pub ino: InodeKey,
    pub index: PageIndex,
    /// Backend private slot reference.
    pub backing: u64,
}

/// What an index slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedPage {
    /// The page is present and all-zero. No backend storage is used.
    Zero,
    Stored(Handle),
}

impl CachedPage {
    pub fn is_zero(&self) -> bool {
        matches!(self, CachedPage::Zero)
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            CachedPage::Zero => None,
            CachedPage::Stored(handle) => Some(*handle),
        }
    }
}

/// Whether every byte of `page` is zero.
pub fn is_zero_page(page: &[u8]) -> bool {
    let mut words = page.chunks_exact(8);
    words.all(|w| u64::from_ne_bytes([w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]]) == 0)
        && words.remainder().iter().all(|&b| b == 0)
}
