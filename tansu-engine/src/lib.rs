//! # tansu-engine
//!
//! Sharded in-memory storage engine for the tansu cache: a fixed power-of-two
//! set of shards, each owning a bump arena, a size-classed slab allocator and
//! an open-addressed hash index with incremental growth.
//!
//! ## Usage
//!
//! - Use [`Store`] from multi-threaded embedders; shards serialize through
//!   per-shard reader-writer locks.
//! - Use [`LocalStore`] from single-threaded embedders (the event-loop
//!   server); it has the same semantics with no locking.
//!
//! ## Structure Overview
//!
//! ```text
//! Store / LocalStore
//!   └── shards: Vec<ShardCore>        (key -> shard by low hash bits)
//!         └── ShardCore
//!               ├── arena: Arena       (bump region, reset only on flush)
//!               ├── slab: SlabPool     (power-of-two value free lists)
//!               ├── entries: Vec<Entry>(arena-backed entry pool)
//!               ├── table: Table       (open addressing, Empty/Tomb/Live)
//!               └── old: Option<...>   (second table during incremental grow)
//! ```

mod arena;
mod entry;
mod hash;
mod index;
mod shard;
mod slab;
mod store;

pub use shard::{ShardCore, ShardStats};
pub use store::{unix_now, LocalStore, Store, StoreConfig, StoreStats};
