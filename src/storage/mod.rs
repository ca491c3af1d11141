//! Storage Engine Module
//!
//! Boundary to the physical store holding version blobs. The consistency
//! core only needs put / get / delete by storage key.

mod memory;
mod traits;

pub use memory::MemoryStorage;
pub use traits::StorageEngine;
