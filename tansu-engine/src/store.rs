//! # Store
//!
//! Key→shard dispatch over a fixed power-of-two shard array, in two
//! flavors with identical semantics:
//!
//! - [`Store`] wraps every shard in a `parking_lot::RwLock` for
//!   multi-threaded embedders. Keys in distinct shards proceed in parallel;
//!   keys sharing a shard serialize through its lock. There is no global
//!   lock.
//! - [`LocalStore`] takes `&mut self` for mutations and is for callers that
//!   guarantee exclusive access themselves, such as the single-threaded
//!   event-loop server, which must not pay for locking it cannot contend on.
//!
//! `flush` is a sequence of per-shard flushes, not a global snapshot;
//! concurrent writers may observe some shards emptied before others.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use tansu_common::proto::MAX_VALUE_LEN;
use tansu_common::CacheResult;

use crate::hash::hash_key;
use crate::shard::ShardCore;

/// Default shard count; a power of two so dispatch is a bitmask.
pub const DEFAULT_SHARDS: usize = 64;

/// Default initial index capacity per shard.
pub const DEFAULT_INDEX_CAPACITY: usize = 1 << 14;

/// Every shard gets at least this much arena regardless of the pool split.
pub const MIN_SHARD_ARENA: usize = 1 << 20;

// Entry offsets are u32, which caps a single shard's arena at 4 GiB.
const MAX_SHARD_ARENA: u64 = 1 << 32;

/// Seconds since the unix epoch; the engine's expiry clock.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Sizing knobs for a store. `Default` matches the server defaults.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Total backing memory divided across shards.
    pub pool_bytes: usize,
    /// Shard count, normalized up to a power of two.
    pub shards: usize,
    /// Initial per-shard index capacity, normalized up to a power of two.
    pub index_capacity: usize,
    /// Per-operation value size cap.
    pub max_value: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            pool_bytes: 64 << 20,
            shards: DEFAULT_SHARDS,
            index_capacity: DEFAULT_INDEX_CAPACITY,
            max_value: MAX_VALUE_LEN,
        }
    }
}

impl StoreConfig {
    pub fn with_pool(pool_bytes: usize) -> Self {
        StoreConfig {
            pool_bytes,
            ..StoreConfig::default()
        }
    }

    fn normalized(mut self) -> Self {
        self.shards = self.shards.max(1).next_power_of_two();
        self.index_capacity = self.index_capacity.max(8).next_power_of_two();
        self
    }

    fn shard_arena_bytes(&self) -> usize {
        let per_shard = (self.pool_bytes / self.shards).max(MIN_SHARD_ARENA) as u64;
        per_shard.min(MAX_SHARD_ARENA) as usize
    }
}

/// Aggregate counters across all shards, as reported by `stats`.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub curr_items: usize,
    pub bytes: usize,
    pub limit_maxbytes: usize,
    pub get_hits: u64,
    pub get_misses: u64,
}

/// Lockless store for single-threaded embedders.
pub struct LocalStore {
    shards: Vec<ShardCore>,
    mask: u64,
    limit: usize,
}

impl LocalStore {
    /// Opens a store over `pool_bytes` of backing memory with defaults for
    /// everything else.
    pub fn open(pool_bytes: usize) -> Self {
        Self::with_config(StoreConfig::with_pool(pool_bytes))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let config = config.normalized();
        let arena = config.shard_arena_bytes();
        let shards = (0..config.shards)
            .map(|_| ShardCore::new(arena, config.index_capacity, config.max_value))
            .collect::<Vec<_>>();
        LocalStore {
            shards,
            mask: (config.shards - 1) as u64,
            limit: config.pool_bytes,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.get_at(key, unix_now())
    }

    pub fn get_at(&self, key: &[u8], now: u64) -> Option<&[u8]> {
        self.shard(key).get(key, now)
    }

    pub fn get_into(&self, key: &[u8], dst: &mut [u8]) -> CacheResult<usize> {
        self.shard(key).get_into(key, unix_now(), dst)
    }

    /// Stores a key with a relative ttl; 0 means never expires.
    pub fn set(&mut self, key: &[u8], value: &[u8], ttl_secs: u32) -> CacheResult<()> {
        let now = unix_now();
        let expires = expiry_from_ttl(now, ttl_secs);
        self.shard_mut(key).set(key, value, expires, now)
    }

    /// Stores a key with an absolute expiry in unix seconds; 0 never expires.
    pub fn set_expiring(&mut self, key: &[u8], value: &[u8], expires: u64) -> CacheResult<()> {
        let now = unix_now();
        self.shard_mut(key).set(key, value, expires, now)
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.shard_mut(key).delete(key, unix_now())
    }

    pub fn flush(&mut self) {
        for shard in &mut self.shards {
            shard.flush();
        }
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            curr_items: 0,
            bytes: 0,
            limit_maxbytes: self.limit,
            get_hits: 0,
            get_misses: 0,
        };
        for shard in &self.shards {
            let s = shard.stats();
            stats.curr_items += s.count;
            stats.bytes += s.bytes;
            stats.get_hits += s.hits;
            stats.get_misses += s.misses;
        }
        stats
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn shard(&self, key: &[u8]) -> &ShardCore {
        &self.shards[(hash_key(key) & self.mask) as usize]
    }

    fn shard_mut(&mut self, key: &[u8]) -> &mut ShardCore {
        &mut self.shards[(hash_key(key) & self.mask) as usize]
    }
}

/// Thread-safe store; per-shard reader-writer locks, no global lock.
pub struct Store {
    shards: Vec<RwLock<ShardCore>>,
    mask: u64,
    limit: usize,
}

impl Store {
    pub fn open(pool_bytes: usize) -> Self {
        Self::with_config(StoreConfig::with_pool(pool_bytes))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let config = config.normalized();
        let arena = config.shard_arena_bytes();
        let shards = (0..config.shards)
            .map(|_| RwLock::new(ShardCore::new(arena, config.index_capacity, config.max_value)))
            .collect::<Vec<_>>();
        Store {
            shards,
            mask: (config.shards - 1) as u64,
            limit: config.pool_bytes,
        }
    }

    /// Copies the value out under the shard's read lock.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get_at(key, unix_now())
    }

    pub fn get_at(&self, key: &[u8], now: u64) -> Option<Vec<u8>> {
        let shard = self.shard(key).read();
        shard.get(key, now).map(|value| value.to_vec())
    }

    /// Copies the value into `dst` under the read lock; the caller owns the
    /// buffer, so the critical section stays bounded by the value length.
    pub fn get_into(&self, key: &[u8], dst: &mut [u8]) -> CacheResult<usize> {
        let shard = self.shard(key).read();
        shard.get_into(key, unix_now(), dst)
    }

    pub fn set(&self, key: &[u8], value: &[u8], ttl_secs: u32) -> CacheResult<()> {
        let now = unix_now();
        let expires = expiry_from_ttl(now, ttl_secs);
        self.shard(key).write().set(key, value, expires, now)
    }

    pub fn set_expiring(&self, key: &[u8], value: &[u8], expires: u64) -> CacheResult<()> {
        let now = unix_now();
        self.shard(key).write().set(key, value, expires, now)
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.shard(key).write().delete(key, unix_now())
    }

    /// Per-shard flushes in sequence; not a cross-shard snapshot.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.write().flush();
        }
    }

    /// Read-locks each shard in turn and sums its counters.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            curr_items: 0,
            bytes: 0,
            limit_maxbytes: self.limit,
            get_hits: 0,
            get_misses: 0,
        };
        for shard in &self.shards {
            let s = shard.read().stats();
            stats.curr_items += s.count;
            stats.bytes += s.bytes;
            stats.get_hits += s.hits;
            stats.get_misses += s.misses;
        }
        stats
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn shard(&self, key: &[u8]) -> &RwLock<ShardCore> {
        &self.shards[(hash_key(key) & self.mask) as usize]
    }
}

fn expiry_from_ttl(now: u64, ttl_secs: u32) -> u64 {
    if ttl_secs == 0 {
        0
    } else {
        now + ttl_secs as u64
    }
}
