use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

macro_rules! cache_stats {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        /// Atomic counters of every cache operation.
        ///
        /// Purely informational, nothing reads them for correctness.
        #[derive(Default)]
        pub struct CleancacheStats {
            $($(#[$doc])* pub $name: AtomicUsize,)*
        }

        /// Plain copy of [`CleancacheStats`] taken at one point in time.
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $($(#[$doc])* pub $name: usize,)*
        }

        impl CleancacheStats {
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        impl StatsSnapshot {
            /// `(name, value)` for every counter, in declaration order.
            pub fn fields(&self) -> impl Iterator<Item = (&'static str, usize)> {
                [$((stringify!($name), self.$name),)*].into_iter()
            }
        }
    };
}

cache_stats! {
    /// Pools in the registry (gauge).
    pools,
    stores,
    store_hits,
    /// Stores dropped because the backend or the index could not take them.
    store_failures,
    /// Entries displaced by a store to an occupied index.
    duplicates,
    loads,
    load_hits,
    flush_pages,
    flush_page_hits,
    flush_inodes,
    flush_inode_hits,
    flush_pools,
    flush_pool_hits,
    evicts,
    evict_hits,
    /// Entries currently in the index (gauge).
    cached_pages,
    /// Entries removed because the backend reclaimed their slot.
    evicted_pages,
    /// Zero-page entries currently in the index (gauge).
    zero_pages,
}

impl CleancacheStats {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn inc(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn dec(counter: &AtomicUsize) {
    counter.fetch_sub(1, Ordering::Relaxed);
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.fields() {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}
