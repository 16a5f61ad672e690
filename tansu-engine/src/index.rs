//! # Hash Index
//!
//! Open-addressed table with linear probing. A slot is empty, a tombstone,
//! or a reference into the shard's entry pool. Probe chains stop only on an
//! empty slot, so tombstones keep chains intact past deleted keys; the first
//! tombstone seen on a miss is remembered as the insertion slot.

/// Old-table slots scanned per store operation during an incremental grow.
pub const MIGRATE_BATCH: usize = 16;

/// One slot of the open-addressed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Empty,
    /// Was occupied, now deleted. Probes continue past it.
    Tomb,
    /// Index into the shard's entry pool.
    Live(u32),
}

/// Outcome of a probe: either the matching slot, or where an insert of the
/// probed key would land.
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    Hit { slot: usize, entry: u32 },
    Miss { slot: usize, tomb: bool },
}

pub struct Table {
    slots: Box<[Slot]>,
    used: usize,
}

impl Table {
    /// Creates an empty table. `capacity` must be a power of two so slot
    /// selection is a bitmask.
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Table {
            slots: vec![Slot::Empty; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied plus tombstoned slots.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn slot(&self, idx: usize) -> Slot {
        self.slots[idx]
    }

    /// True when one more insert would push occupancy past 7/10.
    pub fn needs_grow(&self) -> bool {
        self.used + 1 > self.capacity() * 7 / 10
    }

    /// Probes from the hash's home slot until `matches` accepts a live entry
    /// or an empty slot ends the chain. The growth threshold guarantees the
    /// table always holds an empty slot, so the scan terminates.
    pub fn probe(&self, hash: u64, mut matches: impl FnMut(u32) -> bool) -> Probe {
        let mask = self.capacity() - 1;
        let mut idx = (hash as usize) & mask;
        let mut first_tomb = None;
        loop {
            match self.slots[idx] {
                Slot::Empty => {
                    return match first_tomb {
                        Some(slot) => Probe::Miss { slot, tomb: true },
                        None => Probe::Miss { slot: idx, tomb: false },
                    };
                }
                Slot::Tomb => {
                    if first_tomb.is_none() {
                        first_tomb = Some(idx);
                    }
                }
                Slot::Live(entry) => {
                    if matches(entry) {
                        return Probe::Hit { slot: idx, entry };
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Fills the insertion slot a probe reported. Upgrading a tombstone does
    /// not change `used`; claiming an empty slot does.
    pub fn place(&mut self, slot: usize, entry: u32, reused_tomb: bool) {
        self.slots[slot] = Slot::Live(entry);
        if !reused_tomb {
            self.used += 1;
        }
    }

    /// Replaces a live slot with a tombstone. `used` is unchanged because the
    /// slot still lengthens probe chains.
    pub fn bury(&mut self, slot: usize) {
        self.slots[slot] = Slot::Tomb;
    }

    /// Counts live slots; used to reconcile the shard count after a grow.
    pub fn live_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place_missing(table: &mut Table, hash: u64, entry: u32) {
        match table.probe(hash, |_| false) {
            Probe::Miss { slot, tomb } => table.place(slot, entry, tomb),
            Probe::Hit { .. } => panic!("unexpected hit"),
        }
    }

    #[test]
    fn probe_skips_tombstones() {
        let mut table = Table::with_capacity(8);
        // Three colliding keys at home slot 1.
        place_missing(&mut table, 1, 10);
        place_missing(&mut table, 1, 11);
        place_missing(&mut table, 1, 12);
        assert_eq!(table.used(), 3);

        // Bury the middle of the chain; the tail must stay reachable.
        table.bury(2);
        assert_eq!(table.used(), 3);
        match table.probe(1, |e| e == 12) {
            Probe::Hit { entry, .. } => assert_eq!(entry, 12),
            Probe::Miss { .. } => panic!("chain truncated by tombstone"),
        }
    }

    #[test]
    fn miss_reports_first_tombstone_for_reuse() {
        let mut table = Table::with_capacity(8);
        place_missing(&mut table, 1, 10);
        place_missing(&mut table, 1, 11);
        table.bury(1);

        match table.probe(1, |_| false) {
            Probe::Miss { slot, tomb } => {
                assert_eq!(slot, 1);
                assert!(tomb);
            }
            Probe::Hit { .. } => panic!("unexpected hit"),
        }

        // Reusing the tombstone must not grow `used`.
        let used = table.used();
        table.place(1, 12, true);
        assert_eq!(table.used(), used);
    }

    #[test]
    fn grow_threshold_is_seven_tenths() {
        let mut table = Table::with_capacity(16);
        for i in 0..11 {
            place_missing(&mut table, i as u64, i);
        }
        assert_eq!(table.used(), 11);
        assert!(table.needs_grow());

        let table = Table::with_capacity(16);
        assert!(!table.needs_grow());
    }

    #[test]
    fn wraparound_probe() {
        let mut table = Table::with_capacity(4);
        place_missing(&mut table, 3, 1);
        // Collides at the last slot and wraps to slot 0.
        place_missing(&mut table, 3, 2);
        match table.probe(3, |e| e == 2) {
            Probe::Hit { slot, .. } => assert_eq!(slot, 0),
            Probe::Miss { .. } => panic!("wrapped entry lost"),
        }
    }
}
