//! Bounded in-memory caching and the content-addressed disk store.

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::BoundedMemoryCache;
