//! A/B variant allocation: sticky, weighted, deterministic.

pub mod allocator;

pub use allocator::{Allocation, VariantAllocator};
