#![no_std]

//! Reclaim-time backing index for clean file pages.
//!
//! Pages about to be dropped by reclaim are handed to [`Cleancache::store`]
//! and served back once by [`Cleancache::load`]. The index is two levels
//! deep: a [`Pool`] per filesystem instance maps inode keys to
//! [`IndexNode`]s, each of which maps page indices to [`CachedPage`]s. Page
//! bytes live in an external [`RegionBackend`] that may evict any slot at
//! any time through [`EvictHandler::on_evict`].

mod backend;
mod cache;
mod handle;
mod node;
mod pool;
mod region;
mod registry;
mod stats;

extern crate alloc;

pub use backend::*;
pub use cache::*;
pub use handle::*;
pub use node::*;
pub use pool::*;
pub use region::*;
pub use registry::*;
pub use stats::*;

/// Index of a pool in the registry.
pub type PoolId = usize;
/// Key of an inode inside its filesystem instance.
pub type InodeKey = u64;
/// Page offset inside an inode, in units of pages.
pub type PageIndex = u64;
/// Identifier shared by every mount of a clustered filesystem.
pub type Uuid = [u8; config::cleancache::UUID_LEN];

type Mutex<T> = spin::Mutex<T>;
type RwLock<T> = spin::RwLock<T>;
