//! Two-tier similarity cache.
//!
//! L1 caches query results (scored ID lists, not nodes) and is wiped on
//! every decision write plus a short TTL. L2 caches per-question embedding
//! vectors and never expires — embeddings are immutable for a given model
//! version, which is baked into the question hash.

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

const L1_CAPACITY: usize = 128;
const L2_CAPACITY: usize = 512;
const L1_TTL: Duration = Duration::from_secs(300);

/// Sentinel limit used when the caller did not bound the result count.
pub const UNBOUNDED_LIMIT: usize = 1000;

/// One cached scored result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: Uuid,
    pub score: f64,
}

/// L1 key: question hash + threshold bits + result limit.
pub type QueryKey = (String, u64, usize);

pub fn query_key(question_hash: &str, threshold: f64, limit: Option<usize>) -> QueryKey {
    (
        question_hash.to_string(),
        threshold.to_bits(),
        limit.unwrap_or(UNBOUNDED_LIMIT),
    )
}

struct CachedQuery {
    results: Vec<ScoredId>,
    inserted_at: Instant,
}

/// Hit/miss counters for both tiers.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub combined_hit_rate: f64,
}

/// Process-local cache; never the source of truth.
pub struct SimilarityCache {
    l1: Mutex<LruCache<QueryKey, CachedQuery>>,
    l2: Mutex<LruCache<String, Vec<f32>>>,
    l1_ttl: Duration,
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
}

impl SimilarityCache {
    pub fn new() -> Self {
        Self::with_ttl(L1_TTL)
    }

    pub fn with_ttl(l1_ttl: Duration) -> Self {
        Self {
            l1: Mutex::new(LruCache::new(
                NonZeroUsize::new(L1_CAPACITY).expect("nonzero"),
            )),
            l2: Mutex::new(LruCache::new(
                NonZeroUsize::new(L2_CAPACITY).expect("nonzero"),
            )),
            l1_ttl,
            l1_hits: AtomicU64::new(0),
            l1_misses: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            l2_misses: AtomicU64::new(0),
        }
    }

    pub fn get_query(&self, key: &QueryKey) -> Option<Vec<ScoredId>> {
        let mut l1 = self.l1.lock().expect("l1 lock");
        match l1.get(key) {
            Some(cached) if cached.inserted_at.elapsed() < self.l1_ttl => {
                self.l1_hits.fetch_add(1, Ordering::Relaxed);
                Some(cached.results.clone())
            }
            Some(_) => {
                // Expired: evict and count as a miss
                l1.pop(key);
                self.l1_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.l1_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put_query(&self, key: QueryKey, results: Vec<ScoredId>) {
        self.l1.lock().expect("l1 lock").put(
            key,
            CachedQuery {
                results,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Wipe L1 entirely. Called on every decision write.
    pub fn invalidate_queries(&self) {
        self.l1.lock().expect("l1 lock").clear();
    }

    pub fn get_embedding(&self, question_hash: &str) -> Option<Vec<f32>> {
        let mut l2 = self.l2.lock().expect("l2 lock");
        match l2.get(question_hash) {
            Some(vector) => {
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                Some(vector.clone())
            }
            None => {
                self.l2_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put_embedding(&self, question_hash: &str, vector: Vec<f32>) {
        self.l2
            .lock()
            .expect("l2 lock")
            .put(question_hash.to_string(), vector);
    }

    pub fn stats(&self) -> CacheStats {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l1_misses = self.l1_misses.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l2_misses = self.l2_misses.load(Ordering::Relaxed);
        let lookups = l1_hits + l1_misses + l2_hits + l2_misses;
        let hits = l1_hits + l2_hits;
        CacheStats {
            l1_hits,
            l1_misses,
            l2_hits,
            l2_misses,
            combined_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

impl Default for SimilarityCache {
    fn default() -> Self {
        Self::new()
    }
}
