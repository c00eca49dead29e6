//! Cache collaborator contract and the arena-backed implementation.
//!
//! The protocol layer drives a [`Cache`] implementation through a narrow
//! trait: retrieval, two-phase storage (create → fill → store), delete,
//! arithmetic, touch, flush and stats publication. [`ArenaCache`] is the
//! concrete implementation: a hash index over items whose bytes live
//! entirely inside a [`memalloc::Memalloc`] arena, with allocate-or-evict
//! supplying the memory pressure valve.

mod arena_cache;
mod cache_trait;
mod error;
mod hash;
mod item;
pub mod metrics;
mod response;

pub use arena_cache::{ArenaCache, ArenaCacheConfig, ArenaItem, CacheStats};
pub use cache_trait::{Cache, ItemView};
pub use error::{CacheError, CacheResult};
pub use hash::hash_key;
pub use response::{ArithmeticCommand, Response, StorageCommand};
