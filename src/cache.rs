// Copyright 2025 Cowboy AI, LLC.

//! Session-scoped result cache with request coalescing
//!
//! Size, histogram, and reference-cohort results are memoized for the
//! lifetime of the analysis session. Keys are derived from immutable
//! inputs, so entries never need invalidation or eviction; the map only
//! grows. Coalescing is a correctness requirement, not an optimization:
//! without it, two concurrent requests for the same key could each fire a
//! backend cohort-creation call.

use crate::errors::AnalysisResult;
use crate::identifiers::{AttributeId, DbCohortId, TaskId};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

/// The filter signature part of a cache key
///
/// A signature is the set of currently active ancestor-task ids plus the
/// missing-value-exclusion flag. It fully determines a unique, immutable
/// derived dataset, so two requests with the same signature always map to
/// the same cached value. Task ids are sorted on construction to give the
/// set semantics the contract requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSignature {
    exclude_missing: bool,
    task_ids: Vec<TaskId>,
}

impl FilterSignature {
    /// Build a signature from the active task set and the exclusion flag
    pub fn new(exclude_missing: bool, task_ids: impl IntoIterator<Item = TaskId>) -> Self {
        let mut task_ids: Vec<TaskId> = task_ids.into_iter().collect();
        task_ids.sort();
        task_ids.dedup();
        Self {
            exclude_missing,
            task_ids,
        }
    }

    /// The signature of an unfiltered request
    pub fn unfiltered() -> Self {
        Self::new(false, [])
    }

    /// Whether missing values are excluded
    pub fn excludes_missing(&self) -> bool {
        self.exclude_missing
    }

    /// The sorted active task ids
    pub fn task_ids(&self) -> &[TaskId] {
        &self.task_ids
    }
}

impl fmt::Display for FilterSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks: Vec<String> = self.task_ids.iter().map(|t| t.to_string()).collect();
        write!(f, "tasks={};excl={}", tasks.join("+"), self.exclude_missing)
    }
}

/// A deterministic session cache key
///
/// All key construction is centralized here so cache writers and readers
/// can never drift apart on the key format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a cohort's size
    ///
    /// The backend identity alone suffices: it names one immutable
    /// server-side subset.
    pub fn size(cohort: &DbCohortId) -> Self {
        Self(format!("size|{cohort}"))
    }

    /// Key for a cohort's histogram over one attribute
    pub fn histogram(
        cohort: &DbCohortId,
        attribute: &AttributeId,
        signature: &FilterSignature,
    ) -> Self {
        Self(format!("hist|{cohort}|{attribute}|{signature}"))
    }

    /// Key for a reference cohort derived from the root
    pub fn reference(root: &DbCohortId, signature: &FilterSignature) -> Self {
        Self(format!("ref|{root}|{signature}"))
    }

    /// The underlying key string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type SharedComputation<V> = Shared<BoxFuture<'static, AnalysisResult<V>>>;

enum Slot<V> {
    /// A computation for this key is in flight; later callers await it
    InFlight {
        generation: u64,
        computation: SharedComputation<V>,
    },
    /// The resolved value; written exactly once per key
    Ready(V),
}

/// Session-scoped memoization of backend results
///
/// Entries live for the session; failed computations are not cached, so a
/// later call retries. Concurrent calls for the same key share a single
/// underlying computation.
pub struct SessionCache<V> {
    state: Mutex<CacheState<V>>,
}

struct CacheState<V> {
    slots: HashMap<String, Slot<V>>,
    generations: u64,
}

impl<V> Default for SessionCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SessionCache<V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                generations: 0,
            }),
        }
    }

    /// Whether a resolved value is cached for `key`
    pub fn contains(&self, key: &CacheKey) -> bool {
        let state = self.state.lock().expect("session cache poisoned");
        matches!(state.slots.get(key.as_str()), Some(Slot::Ready(_)))
    }

    /// Number of resolved entries
    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("session cache poisoned");
        state
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Whether the cache holds no resolved entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> SessionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Look up `key`, computing and storing the value on a miss
    ///
    /// If a computation for `key` is already in flight, the call awaits
    /// that computation instead of starting a second one; both callers
    /// resolve to the result of the single underlying request.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> AnalysisResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnalysisResult<V>> + Send + 'static,
    {
        enum Lookup<V> {
            Hit(V),
            Join(SharedComputation<V>),
            Started(SharedComputation<V>, u64),
        }

        let lookup = {
            let mut state = self.state.lock().expect("session cache poisoned");
            match state.slots.get(key.as_str()) {
                Some(Slot::Ready(value)) => Lookup::Hit(value.clone()),
                Some(Slot::InFlight { computation, .. }) => Lookup::Join(computation.clone()),
                None => {
                    state.generations += 1;
                    let generation = state.generations;
                    let computation: SharedComputation<V> = compute().boxed().shared();
                    state.slots.insert(
                        key.as_str().to_string(),
                        Slot::InFlight {
                            generation,
                            computation: computation.clone(),
                        },
                    );
                    Lookup::Started(computation, generation)
                }
            }
        };

        let (computation, generation) = match lookup {
            Lookup::Hit(value) => {
                debug!(%key, "session cache hit");
                return Ok(value);
            }
            Lookup::Join(computation) => {
                debug!(%key, "session cache coalesced");
                return computation.await;
            }
            Lookup::Started(computation, generation) => {
                debug!(%key, "session cache miss");
                (computation, generation)
            }
        };

        let result = computation.await;

        // Single assignment per key: the originating caller settles the
        // slot; coalesced waiters only observe it.
        let mut state = self.state.lock().expect("session cache poisoned");
        let ours = matches!(
            state.slots.get(key.as_str()),
            Some(Slot::InFlight { generation: g, .. }) if *g == generation
        );
        if ours {
            match &result {
                Ok(value) => {
                    state.slots.insert(key.as_str().to_string(), Slot::Ready(value.clone()));
                }
                Err(_) => {
                    state.slots.remove(key.as_str());
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AnalysisError;

    fn size_key(id: &str) -> CacheKey {
        CacheKey::size(&DbCohortId::from(id))
    }

    /// The same inputs always build the same key, task order ignored
    #[test]
    fn test_key_determinism() {
        let a = TaskId::new();
        let b = TaskId::new();
        let root = DbCohortId::from("root");

        let key1 = CacheKey::reference(&root, &FilterSignature::new(true, [a, b]));
        let key2 = CacheKey::reference(&root, &FilterSignature::new(true, [b, a]));
        assert_eq!(key1, key2);

        let key3 = CacheKey::reference(&root, &FilterSignature::new(false, [a, b]));
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_key_kinds_disjoint() {
        let root = DbCohortId::from("root");
        let signature = FilterSignature::unfiltered();

        let size = CacheKey::size(&root);
        let hist = CacheKey::histogram(&root, &AttributeId::from("age"), &signature);
        let reference = CacheKey::reference(&root, &signature);

        assert_ne!(size, hist);
        assert_ne!(size, reference);
        assert_ne!(hist, reference);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache: SessionCache<u64> = SessionCache::new();
        let key = size_key("c1");

        let value = cache.get_or_compute(&key, || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(cache.contains(&key));

        // Second call must not recompute.
        let value = cache
            .get_or_compute(&key, || async { panic!("recomputed a cached key") })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(cache.len(), 1);
    }

    /// Failures are returned but not cached; a later call retries
    #[tokio::test]
    async fn test_failure_not_cached() {
        let cache: SessionCache<u64> = SessionCache::new();
        let key = size_key("c1");

        let err = cache
            .get_or_compute(&key, || async {
                Err(AnalysisError::backend("cohort_size", "boom"))
            })
            .await
            .unwrap_err();
        assert!(err.is_backend_error());
        assert!(!cache.contains(&key));

        let value = cache.get_or_compute(&key, || async { Ok(9) }).await.unwrap();
        assert_eq!(value, 9);
    }

    /// Two concurrent calls with the same key share one computation
    #[tokio::test]
    async fn test_coalescing() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let cache: Arc<SessionCache<u64>> = Arc::new(SessionCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = size_key("c1");

        let first = {
            let cache = cache.clone();
            let calls = calls.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(11)
                    })
                    .await
            })
        };
        // Give the first call time to start its computation.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second = {
            let cache = cache.clone();
            let calls = calls.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(99)
                    })
                    .await
            })
        };

        assert_eq!(first.await.unwrap().unwrap(), 11);
        assert_eq!(second.await.unwrap().unwrap(), 11);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
