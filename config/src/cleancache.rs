/// Registry capacity, one pool per mounted filesystem instance.
pub const MAX_POOLS: usize = 32;

/// Entries released per batch while flushing a whole inode or pool.
pub const FLUSH_BATCH: usize = 16;

/// Length of the identifier naming a shared pool.
pub const UUID_LEN: usize = 16;

/// Slots in a freshly built fixed-region backend.
pub const DEFAULT_REGION_SLOTS: usize = 1024;
