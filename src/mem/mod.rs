//! Physical memory: access, the memory lists, the allocator and paging.

pub mod alloc;
#[cfg(test)]
pub mod fake;
pub mod map;
pub mod memlist;
pub mod paging;
pub mod phys;
mod types;

pub use types::*;
