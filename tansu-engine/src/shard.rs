//! # Shard
//!
//! One independent partition of the key space: a bump arena, slab free
//! lists, an arena-backed entry pool, and an open-addressed index that grows
//! incrementally. All operations here assume exclusive access for writes;
//! [`crate::Store`] adds the reader-writer lock, the event-loop server calls
//! straight in through [`crate::LocalStore`].
//!
//! ## Incremental growth
//!
//! When occupancy would cross 7/10 a second table of doubled capacity is
//! allocated. Every subsequent store operation (set and delete both count)
//! migrates the next [`MIGRATE_BATCH`] old-table slots, re-inserting live,
//! unexpired entries. Lookups and deletes consult the new table first, then
//! the old; inserts always target the new table; an existing key matched in
//! the old table is updated in place and transported later by the migration
//! scan. When the scan completes the old table is dropped and the live count
//! is reconciled by walking the survivor.

use std::sync::atomic::{AtomicU64, Ordering};

use tansu_common::proto::MAX_KEY_LEN;
use tansu_common::{CacheError, CacheResult};

use crate::arena::Arena;
use crate::entry::Entry;
use crate::hash::hash_key;
use crate::index::{Probe, Slot, Table, MIGRATE_BATCH};
use crate::slab::{SizeClass, SlabPool};

/// Second table plus the scan cursor while a grow is in flight.
struct Migration {
    table: Table,
    cursor: usize,
}

/// Counters one shard reports into the aggregate `stats` response.
#[derive(Debug, Clone, Copy)]
pub struct ShardStats {
    pub count: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ShardCore {
    arena: Arena,
    slab: SlabPool,
    entries: Vec<Entry>,
    table: Table,
    old: Option<Migration>,
    /// Live entries; expired records stay counted until overwritten,
    /// reconciled away by a grow, or flushed.
    count: usize,
    // Relaxed atomics so `get` can count under a shared borrow.
    hits: AtomicU64,
    misses: AtomicU64,
    max_value: usize,
    initial_capacity: usize,
}

impl ShardCore {
    /// Creates a shard over `arena_bytes` of backing memory with the given
    /// initial index capacity (a power of two) and per-value byte cap.
    pub fn new(arena_bytes: usize, index_capacity: usize, max_value: usize) -> Self {
        let mut arena = Arena::new(arena_bytes);
        let mut slab = SlabPool::new();
        slab.prewarm(&mut arena);
        ShardCore {
            arena,
            slab,
            entries: Vec::new(),
            table: Table::with_capacity(index_capacity),
            old: None,
            count: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_value,
            initial_capacity: index_capacity,
        }
    }

    /// Looks up a key, counting the hit or miss.
    ///
    /// The returned slice borrows the shard; callers copy it out before the
    /// next mutation.
    pub fn get(&self, key: &[u8], now: u64) -> Option<&[u8]> {
        match self.find(key) {
            Some(entry) if self.entries[entry as usize].is_live(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(self.entries[entry as usize].value(&self.arena))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Copies the value into `dst`. On `TooSmall` the required length is
    /// reported and `dst` is left untouched.
    pub fn get_into(&self, key: &[u8], now: u64, dst: &mut [u8]) -> CacheResult<usize> {
        match self.get(key, now) {
            Some(value) => {
                if dst.len() < value.len() {
                    return Err(CacheError::TooSmall {
                        required: value.len(),
                    });
                }
                dst[..value.len()].copy_from_slice(value);
                Ok(value.len())
            }
            None => Err(CacheError::NotFound),
        }
    }

    /// Inserts or overwrites a key. `expires` is absolute unix seconds, 0 for
    /// never. Fails with `OutOfMemory` when the arena cannot serve the value
    /// block or the key copy; the previous value (if any) is left intact.
    pub fn set(&mut self, key: &[u8], value: &[u8], expires: u64, now: u64) -> CacheResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(CacheError::BadKey(key.len()));
        }
        if value.len() > self.max_value {
            return Err(CacheError::ValueTooLarge(value.len()));
        }

        self.migrate_step(now);

        let hash = hash_key(key);
        let mut probe = self
            .table
            .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key));
        if let Probe::Hit { entry, .. } = probe {
            return self.rewrite(entry, value, expires);
        }
        if let Some(mig) = &self.old {
            // Matched in the old table: update in place, the migration scan
            // will transport it.
            if let Probe::Hit { entry, .. } = mig
                .table
                .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key))
            {
                return self.rewrite(entry, value, expires);
            }
        }

        if self.old.is_none() && self.table.needs_grow() {
            self.begin_grow();
            probe = self
                .table
                .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key));
        }
        let (slot, reused_tomb) = match probe {
            Probe::Miss { slot, tomb } => (slot, tomb),
            // A freshly grown table cannot hold the key we just missed.
            Probe::Hit { entry, .. } => return self.rewrite(entry, value, expires),
        };

        let (val_off, class) = self
            .slab
            .alloc(&mut self.arena, value.len())
            .ok_or(CacheError::OutOfMemory)?;
        let key_off = match self.arena.alloc(key.len()) {
            Some(off) => off,
            None => {
                self.slab.free(&mut self.arena, val_off, class);
                return Err(CacheError::OutOfMemory);
            }
        };
        self.arena.bytes_mut(val_off, value.len()).copy_from_slice(value);
        self.arena.bytes_mut(key_off, key.len()).copy_from_slice(key);

        let entry = self.entries.len() as u32;
        self.entries.push(Entry {
            key_off: key_off as u32,
            key_len: key.len() as u16,
            val_off: val_off as u32,
            val_len: value.len() as u32,
            expires,
            class,
            deleted: false,
        });
        self.table.place(slot, entry, reused_tomb);
        self.count += 1;
        Ok(())
    }

    /// Removes a key. Expired entries report absence and stay untouched.
    pub fn delete(&mut self, key: &[u8], now: u64) -> bool {
        self.migrate_step(now);

        let hash = hash_key(key);
        let mut found = None;
        if let Probe::Hit { slot, entry } = self
            .table
            .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key))
        {
            found = Some((slot, entry, false));
        } else if let Some(mig) = &self.old {
            if let Probe::Hit { slot, entry } = mig
                .table
                .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key))
            {
                found = Some((slot, entry, true));
            }
        }
        let Some((slot, entry, in_old)) = found else {
            return false;
        };
        if !self.entries[entry as usize].is_live(now) {
            return false;
        }

        let (val_off, class) = {
            let e = &self.entries[entry as usize];
            (e.val_off as usize, e.class)
        };
        self.slab.free(&mut self.arena, val_off, class);
        self.entries[entry as usize].deleted = true;
        if in_old {
            if let Some(mig) = &mut self.old {
                mig.table.bury(slot);
            }
        } else {
            self.table.bury(slot);
        }
        self.count -= 1;
        true
    }

    /// Drops every entry in one step: the arena cursor rewinds, the free
    /// lists are wiped, and the index is rebuilt empty. Hit/miss counters
    /// survive, matching the wire `stats` contract.
    pub fn flush(&mut self) {
        self.arena.reset();
        self.slab.clear();
        self.entries.clear();
        self.table = Table::with_capacity(self.initial_capacity);
        self.old = None;
        self.count = 0;
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            count: self.count,
            bytes: self.arena.used(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// New table first, old second; a key present in either is reported even
    /// when deleted or expired, and the caller treats those as misses.
    fn find(&self, key: &[u8]) -> Option<u32> {
        let hash = hash_key(key);
        if let Probe::Hit { entry, .. } = self
            .table
            .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key))
        {
            return Some(entry);
        }
        if let Some(mig) = &self.old {
            if let Probe::Hit { entry, .. } = mig
                .table
                .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key))
            {
                return Some(entry);
            }
        }
        None
    }

    /// Overwrites an existing entry's value and expiry in place.
    fn rewrite(&mut self, entry: u32, value: &[u8], expires: u64) -> CacheResult<()> {
        let idx = entry as usize;
        let new_class = SizeClass::for_len(value.len());
        if matches!(new_class, SizeClass::Pool(_)) && new_class == self.entries[idx].class {
            // Same class: the existing block already fits the new value.
            let off = self.entries[idx].val_off as usize;
            self.arena.bytes_mut(off, value.len()).copy_from_slice(value);
        } else {
            // Allocate before freeing so a failed overwrite leaves the old
            // value readable.
            let (val_off, class) = self
                .slab
                .alloc(&mut self.arena, value.len())
                .ok_or(CacheError::OutOfMemory)?;
            self.arena.bytes_mut(val_off, value.len()).copy_from_slice(value);
            let (old_off, old_class) = {
                let e = &self.entries[idx];
                (e.val_off as usize, e.class)
            };
            self.slab.free(&mut self.arena, old_off, old_class);
            let e = &mut self.entries[idx];
            e.val_off = val_off as u32;
            e.class = class;
        }
        let e = &mut self.entries[idx];
        e.val_len = value.len() as u32;
        e.expires = expires;
        Ok(())
    }

    fn begin_grow(&mut self) {
        let new = Table::with_capacity(self.table.capacity() * 2);
        let old = std::mem::replace(&mut self.table, new);
        self.old = Some(Migration {
            table: old,
            cursor: 0,
        });
    }

    /// Transports the next batch of old-table slots into the current table.
    /// Deleted and expired entries are skipped; their records stay in the
    /// entry pool but become unreachable once the old table retires.
    fn migrate_step(&mut self, now: u64) {
        let Some(mut mig) = self.old.take() else {
            return;
        };
        let end = (mig.cursor + MIGRATE_BATCH).min(mig.table.capacity());
        for slot in mig.cursor..end {
            let Slot::Live(entry) = mig.table.slot(slot) else {
                continue;
            };
            if !self.entries[entry as usize].is_live(now) {
                continue;
            }
            let key = self.entries[entry as usize].key(&self.arena);
            let hash = hash_key(key);
            match self
                .table
                .probe(hash, |e| entry_key_eq(&self.entries, &self.arena, e, key))
            {
                Probe::Miss { slot: dst, tomb } => self.table.place(dst, entry, tomb),
                // Already transported by an earlier batch.
                Probe::Hit { .. } => {}
            }
        }
        mig.cursor = end;
        if mig.cursor >= mig.table.capacity() {
            self.count = self.table.live_slots();
        } else {
            self.old = Some(mig);
        }
    }

    #[cfg(test)]
    fn migrating(&self) -> bool {
        self.old.is_some()
    }
}

fn entry_key_eq(entries: &[Entry], arena: &Arena, entry: u32, key: &[u8]) -> bool {
    let e = &entries[entry as usize];
    e.key_len as usize == key.len() && e.key(arena) == key
}
