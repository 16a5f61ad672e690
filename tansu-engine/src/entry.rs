//! Entry metadata for the per-shard pool.

use crate::arena::Arena;
use crate::slab::SizeClass;

/// One key's record. The key and value bytes live in the shard arena; this
/// struct only carries offsets, so entries stay small and the pool stays
/// cache-friendly. Entries are never removed from the pool; a delete marks
/// the record and recycles its value block.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key_off: u32,
    pub key_len: u16,
    pub val_off: u32,
    pub val_len: u32,
    /// Absolute unix seconds; 0 means never expires.
    pub expires: u64,
    /// Where the value block returns on overwrite or delete.
    pub class: SizeClass,
    pub deleted: bool,
}

impl Entry {
    pub fn key<'a>(&self, arena: &'a Arena) -> &'a [u8] {
        arena.bytes(self.key_off as usize, self.key_len as usize)
    }

    pub fn value<'a>(&self, arena: &'a Arena) -> &'a [u8] {
        arena.bytes(self.val_off as usize, self.val_len as usize)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires != 0 && now >= self.expires
    }

    /// Present and readable: not deleted, not expired.
    pub fn is_live(&self, now: u64) -> bool {
        !self.deleted && !self.is_expired(now)
    }
}
