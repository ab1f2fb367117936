//! Compilation cache
//!
//! Bounded LRU keyed by the SHA-256 fingerprint of the source text
//! concatenated with the target name. The map itself sits behind a single
//! lock; each entry is a once-cell, so concurrent `compile` calls for the
//! same key block on one pipeline execution and all observe the same
//! result (at-most-once build per fingerprint).
//!
//! Only successful results are retained. A failed compile drops its cell
//! on the way out, so a later identical request runs the pipeline again.

use crate::driver::CompilationResult;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

type Entry = Arc<OnceLock<Arc<CompilationResult>>>;

struct CacheInner {
    entries: HashMap<String, Entry>,
    // Recency order, least-recent at the front.
    order: VecDeque<String>,
}

pub struct CompilationCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl CompilationCache {
    pub fn new(capacity: usize) -> Self {
        CompilationCache {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// SHA-256 over source text plus the textual target name.
    pub fn fingerprint(source: &str, target_name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(target_name.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Fetch the cached result for `key`, or build it exactly once.
    pub fn get_or_build(
        &self,
        key: &str,
        build: impl FnOnce() -> CompilationResult,
    ) -> Arc<CompilationResult> {
        let cell = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match inner.entries.get(key) {
                Some(cell) => {
                    let cell = cell.clone();
                    touch(&mut inner.order, key);
                    cell
                }
                None => {
                    let cell: Entry = Arc::new(OnceLock::new());
                    inner.entries.insert(key.to_string(), cell.clone());
                    inner.order.push_back(key.to_string());
                    while inner.entries.len() > self.capacity {
                        if let Some(evicted) = inner.order.pop_front() {
                            inner.entries.remove(&evicted);
                            debug!(key = %evicted, "evicted cache entry");
                        } else {
                            break;
                        }
                    }
                    cell
                }
            }
        };
        // The pipeline runs outside the map lock; other callers for the
        // same key block here instead of rebuilding.
        let result = cell
            .get_or_init(|| Arc::new(build()))
            .clone();
        if !result.success {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if inner
                .entries
                .get(key)
                .is_some_and(|existing| Arc::ptr_eq(existing, &cell))
            {
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(position) = order.iter().position(|k| k == key) {
        if let Some(entry) = order.remove(position) {
            order.push_back(entry);
        }
    }
}

/// The process-wide cache instance: the only process-wide state in the
/// toolchain.
pub fn global_cache() -> &'static CompilationCache {
    static GLOBAL: OnceLock<CompilationCache> = OnceLock::new();
    GLOBAL.get_or_init(|| CompilationCache::new(DEFAULT_CACHE_CAPACITY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{CompilationTarget, compile_uncached};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build_counted(counter: &AtomicUsize, source: &str) -> CompilationResult {
        counter.fetch_add(1, Ordering::SeqCst);
        compile_uncached(source, CompilationTarget::Bytecode)
    }

    #[test]
    fn test_fingerprint_distinguishes_targets() {
        let a = CompilationCache::fingerprint("return 1;", "bytecode");
        let b = CompilationCache::fingerprint("return 1;", "mlir");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_build_happens_once_per_key() {
        let cache = CompilationCache::new(8);
        let counter = AtomicUsize::new(0);
        for _ in 0..5 {
            let result =
                cache.get_or_build("key", || build_counted(&counter, "return 1;"));
            assert!(result.success);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_callers_share_one_build() {
        let cache = Arc::new(CompilationCache::new(8));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                let result =
                    cache.get_or_build("shared", || build_counted(&counter, "return 2;"));
                assert!(result.success);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let cache = CompilationCache::new(2);
        let counter = AtomicUsize::new(0);
        cache.get_or_build("a", || build_counted(&counter, "return 1;"));
        cache.get_or_build("b", || build_counted(&counter, "return 2;"));
        // Touch `a` so `b` becomes least recent.
        cache.get_or_build("a", || build_counted(&counter, "return 1;"));
        cache.get_or_build("c", || build_counted(&counter, "return 3;"));
        assert_eq!(cache.len(), 2);
        // `b` was evicted: building it again re-runs the pipeline.
        cache.get_or_build("b", || build_counted(&counter, "return 2;"));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_failures_are_not_retained() {
        let cache = CompilationCache::new(8);
        let counter = AtomicUsize::new(0);
        let result = cache.get_or_build("bad", || build_counted(&counter, "break;"));
        assert!(!result.success);
        assert!(cache.is_empty());
        cache.get_or_build("bad", || build_counted(&counter, "break;"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
