pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
pub const PAGE_SIZE_BITS: usize = 12;
