//! Hash-keyed cache of network evaluations.
//!
//! Sharded by the top bits of the position fingerprint so concurrent
//! workers rarely contend on the same lock. Each shard keeps its own LRU
//! order; insertion of an already-present key is a no-op, which makes
//! racing inserts of the same position benign (first writer wins).

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const NUM_SHARDS: usize = 16;

/// One cached network evaluation. `policy` holds prior probabilities
/// indexed by legal-move ordinal, already softmaxed and normalised.
#[derive(Debug, Clone)]
pub struct CachedEval {
    pub q: f32,
    pub d: f32,
    pub m: f32,
    pub policy: Box<[f32]>,
}

struct Entry {
    data: Arc<CachedEval>,
    stamp: u64,
}

#[derive(Default)]
struct Shard {
    map: FxHashMap<u64, Entry>,
    /// stamp -> key, oldest first. Stamps are unique within a shard.
    recency: BTreeMap<u64, u64>,
    next_stamp: u64,
}

impl Shard {
    fn touch(&mut self, key: u64) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(entry) = self.map.get_mut(&key) {
            self.recency.remove(&entry.stamp);
            entry.stamp = stamp;
            self.recency.insert(stamp, key);
        }
    }

    fn evict_to(&mut self, cap: usize) {
        while self.map.len() > cap {
            let Some((&stamp, &key)) = self.recency.iter().next() else {
                break;
            };
            self.recency.remove(&stamp);
            self.map.remove(&key);
        }
    }
}

/// The shared evaluation cache. Capacity is measured in entries and
/// divided evenly across shards; transiently each shard may hold one
/// entry over its share between eviction checks.
pub struct NNCache {
    shards: Vec<Mutex<Shard>>,
    capacity: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NNCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Mutex::new(Shard::default())).collect(),
            capacity: AtomicUsize::new(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: u64) -> &Mutex<Shard> {
        &self.shards[(key >> 60) as usize & (NUM_SHARDS - 1)]
    }

    fn shard_capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed).div_ceil(NUM_SHARDS)
    }

    /// Look up a fingerprint. A hit refreshes the entry's recency.
    pub fn probe(&self, key: u64) -> Option<Arc<CachedEval>> {
        if self.capacity.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let mut shard = self.shard(key).lock();
        if let Some(entry) = shard.map.get(&key) {
            let data = Arc::clone(&entry.data);
            shard.touch(key);
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(data)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Install an evaluation. Idempotent: if the key is already present
    /// the existing entry wins and the new one is dropped.
    pub fn insert(&self, key: u64, eval: CachedEval) {
        let cap = self.capacity.load(Ordering::Relaxed);
        let mut shard = self.shard(key).lock();
        if cap == 0 {
            // Caching disabled; stale entries drain on the insert path.
            shard.map.clear();
            shard.recency.clear();
            return;
        }
        if shard.map.contains_key(&key) {
            return;
        }
        // Evict down to capacity first, then install; a shard may sit one
        // entry over its share until the next insert.
        let cap = self.shard_capacity();
        shard.evict_to(cap);
        let stamp = shard.next_stamp;
        shard.next_stamp += 1;
        shard.map.insert(
            key,
            Entry {
                data: Arc::new(eval),
                stamp,
            },
        );
        shard.recency.insert(stamp, key);
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.map.clear();
            shard.recency.clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Occupancy in permille of capacity, for `info hashfull`.
    pub fn hashfull(&self) -> u32 {
        let cap = self.capacity.load(Ordering::Relaxed);
        if cap == 0 {
            return 0;
        }
        (self.len() * 1000 / cap).min(1000) as u32
    }
}
