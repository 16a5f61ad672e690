//! Throughput driver for the storage engine.
//!
//! Three phases, each timed separately:
//!
//! 1. `fill` inserts distinct keys with value lengths spread across the
//!    slab classes, including one past the largest pooled block, so the
//!    index grows incrementally while every free-list refill path runs.
//! 2. `get` hammers the read fast path with seeded random lookups.
//! 3. `churn` overwrites keys with values from a different class on every
//!    draw and periodically deletes and reinserts, keeping the tombstone
//!    and block-recycling paths hot.
//!
//! The PRNG is seeded, so runs of the same binary are comparable.

use std::env;
use std::hint::black_box;
use std::time::Instant;

use tansu_engine::{LocalStore, StoreConfig};

/// Fill lengths, one per pooled class tier plus a bump-class value.
const FILL_LENGTHS: [usize; 5] = [24, 140, 900, 3500, 6000];

/// Churn lengths stay inside the pooled classes; bump blocks are never
/// recycled and would only measure arena exhaustion.
const CHURN_LENGTHS: [usize; 4] = [48, 200, 1100, 2600];

struct Opts {
    keys: usize,
    ops: usize,
    pool_mb: usize,
}

impl Opts {
    /// `bench_engine [keys] [ops] [pool_mb]`, every argument optional.
    fn parse() -> Self {
        let mut args = env::args().skip(1);
        let mut grab = |fallback: usize| {
            args.next()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(fallback)
        };
        let keys = grab(1 << 16);
        let ops = grab(1 << 20);
        let pool_mb = grab(512);
        Opts { keys, ops, pool_mb }
    }
}

/// SplitMix64; one add-mix round per draw, stable across platforms.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

fn build_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("bench:{i:08}").into_bytes()).collect()
}

fn build_values(lengths: &[usize]) -> Vec<Vec<u8>> {
    lengths
        .iter()
        .map(|&len| {
            let mut value = vec![0x5au8; len];
            value[0] = len as u8;
            value
        })
        .collect()
}

fn throughput(label: &str, ops: usize, start: Instant) {
    let secs = start.elapsed().as_secs_f64();
    println!(
        "{label:>6}: {:>12.0} ops/s  ({ops} ops in {secs:.3}s)",
        ops as f64 / secs
    );
}

fn main() {
    let opts = Opts::parse();
    let keys = opts.keys.max(1).next_power_of_two();
    let mask = keys - 1;

    let key_bufs = build_keys(keys);
    let fill_values = build_values(&FILL_LENGTHS);
    let churn_values = build_values(&CHURN_LENGTHS);
    let mut store = LocalStore::with_config(StoreConfig::with_pool(opts.pool_mb << 20));

    println!("keys={keys} ops={} pool={}MiB", opts.ops, opts.pool_mb);

    let start = Instant::now();
    for i in 0..keys {
        let value = &fill_values[i % FILL_LENGTHS.len()];
        if let Err(err) = store.set(&key_bufs[i], value, 0) {
            eprintln!("fill stopped at key {i}: {err}");
            std::process::exit(1);
        }
    }
    throughput("fill", keys, start);

    let mut rng = SplitMix64(0x5eed_cafe_f00d_d00d);
    let start = Instant::now();
    for _ in 0..opts.ops {
        let i = (rng.next() as usize) & mask;
        black_box(store.get(&key_bufs[i]));
    }
    throughput("get", opts.ops, start);

    let start = Instant::now();
    for n in 0..opts.ops {
        let i = (rng.next() as usize) & mask;
        // Rotating by n usually lands in a different class than the key's
        // last value, so overwrites keep freeing and popping blocks.
        let value = &churn_values[(i + n) % CHURN_LENGTHS.len()];
        if n % 8 == 0 {
            store.delete(&key_bufs[i]);
        }
        if let Err(err) = store.set(&key_bufs[i], value, 0) {
            eprintln!("churn stopped at op {n}: {err}");
            std::process::exit(1);
        }
    }
    throughput("churn", opts.ops, start);

    let stats = store.stats();
    let lookups = (stats.get_hits + stats.get_misses).max(1);
    println!(
        "items={} arena_bytes={} hit_rate={:.3}",
        stats.curr_items,
        stats.bytes,
        stats.get_hits as f64 / lookups as f64
    );
}
