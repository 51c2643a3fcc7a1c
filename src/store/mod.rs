//! Shared counter store: the one external collaborator.
//!
//! Everything the engine persists outside the process (rate-limit windows,
//! the shared cache tier) goes through the [`CounterStore`] trait.

pub mod guarded;
pub mod memory;
pub mod redis;
pub mod traits;

pub use guarded::GuardedStore;
pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;
pub use traits::{CounterStore, StoreError, StoredValue};
