//! collector-rtdb - async key-value cache abstraction and the bit-exact
//! key layout the rest of the workspace writes through.

pub mod keyspace;
pub mod memory_impl;
pub mod traits;

pub use memory_impl::MemoryRtdb;
pub use traits::Rtdb;
