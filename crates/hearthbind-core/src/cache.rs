// ── Expiring result cache ──
//
// Memoizes the last successful fetch per logical query key with TTL-based
// invalidation. Guarantees at-most-one in-flight fetch per key: a per-key
// async mutex serializes fetchers, and late arrivals re-check the slot
// after acquiring the lock instead of issuing a duplicate remote call.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// What a caller needs when the fetch fails but a stale value exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Return the previous cached value on fetch failure, if any.
    BestEffort,
    /// Surface the fetch error even when a stale value exists.
    Required,
}

struct Stored<V> {
    value: Arc<V>,
    fetched_at: Instant,
    ttl: Duration,
}

impl<V> Stored<V> {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > self.ttl
    }
}

struct Slot<V> {
    stored: Option<Stored<V>>,
}

/// TTL cache with single-flight fetches, keyed by logical query.
///
/// Entries are replaced atomically: readers see either the previous value
/// or the fully-written new one, never a partial state.
pub struct ExpiringCache<K, V> {
    slots: DashMap<K, Arc<Mutex<Slot<V>>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Return the cached value if unexpired; otherwise run `fetch` and
    /// store its result with the given TTL.
    ///
    /// Concurrent callers on the same key serialize on the slot: whoever
    /// arrives while a fetch is in flight awaits that result instead of
    /// fetching again. On fetch failure the previous value (stale or not)
    /// is retained; [`Freshness::BestEffort`] callers receive it,
    /// [`Freshness::Required`] callers receive the error.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: K,
        ttl: Duration,
        freshness: Freshness,
        fetch: F,
    ) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if let Some(ref stored) = guard.stored {
            if !stored.is_expired() {
                return Ok(Arc::clone(&stored.value));
            }
        }

        match fetch().await {
            Ok(value) => {
                let value = Arc::new(value);
                guard.stored = Some(Stored {
                    value: Arc::clone(&value),
                    fetched_at: Instant::now(),
                    ttl,
                });
                Ok(value)
            }
            Err(e) => match (freshness, &guard.stored) {
                (Freshness::BestEffort, Some(stored)) => Ok(Arc::clone(&stored.value)),
                _ => Err(e),
            },
        }
    }

    /// Fetch unconditionally, replacing whatever is cached.
    ///
    /// Still single-flight: if another forced refresh completed while this
    /// caller waited for the slot, its result is returned instead of
    /// issuing a second call.
    pub async fn refresh<F, Fut, E>(&self, key: K, ttl: Duration, fetch: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let requested_at = Instant::now();
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if let Some(ref stored) = guard.stored {
            if stored.fetched_at >= requested_at {
                return Ok(Arc::clone(&stored.value));
            }
        }

        let value = Arc::new(fetch().await?);
        guard.stored = Some(Stored {
            value: Arc::clone(&value),
            fetched_at: Instant::now(),
            ttl,
        });
        Ok(value)
    }

    /// Drop the entry for `key`. The next read fetches.
    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    /// Drop every entry whose key matches the predicate.
    pub fn invalidate_matching(&self, mut pred: impl FnMut(&K) -> bool) {
        self.slots.retain(|k, _| !pred(k));
    }

    /// `true` when no unexpired value exists for `key`.
    pub async fn is_expired(&self, key: &K) -> bool {
        let Some(slot) = self.slots.get(key).map(|r| Arc::clone(r.value())) else {
            return true;
        };
        let guard = slot.lock().await;
        guard.stored.as_ref().map_or(true, Stored::is_expired)
    }

    fn slot(&self, key: K) -> Arc<Mutex<Slot<V>>> {
        Arc::clone(
            self.slots
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(Slot { stored: None })))
                .value(),
        )
    }
}

impl<K, V> Default for ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct Boom;

    #[tokio::test(start_paused = true)]
    async fn value_survives_until_ttl_then_refetches() {
        let cache: ExpiringCache<&str, u32> = ExpiringCache::new();
        let calls = AtomicU32::new(0);
        let ttl = Duration::from_secs(60);

        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Boom>(7) }
        };

        let v = cache
            .get_or_fetch("k", ttl, Freshness::Required, fetch)
            .await
            .expect("first fetch");
        assert_eq!(*v, 7);

        // Any read before the TTL elapses returns the cached value.
        tokio::time::advance(Duration::from_secs(59)).await;
        let v = cache
            .get_or_fetch::<_, _, Boom>("k", ttl, Freshness::Required, || async {
                panic!("must not fetch while fresh")
            })
            .await
            .expect("cached");
        assert_eq!(*v, 7);

        // Strictly past the TTL, exactly one refetch happens.
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.is_expired(&"k").await);
        let v = cache
            .get_or_fetch("k", ttl, Freshness::Required, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Boom>(8) }
            })
            .await
            .expect("refetch");
        assert_eq!(*v, 8);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache: Arc<ExpiringCache<&str, u32>> = Arc::new(ExpiringCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch("k", Duration::from_secs(60), Freshness::Required, || {
                            let calls = Arc::clone(&calls);
                            async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok::<_, Boom>(42)
                            }
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(*task.await.expect("join").expect("fetch"), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one underlying fetch");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_value_served_best_effort_on_failure() {
        let cache: ExpiringCache<&str, u32> = ExpiringCache::new();
        let ttl = Duration::from_secs(10);

        cache
            .get_or_fetch("k", ttl, Freshness::Required, || async { Ok::<_, Boom>(1) })
            .await
            .expect("seed");

        tokio::time::advance(Duration::from_secs(11)).await;

        // Best-effort readers keep the stale value on fetch failure.
        let v = cache
            .get_or_fetch("k", ttl, Freshness::BestEffort, || async { Err(Boom) })
            .await
            .expect("stale fallback");
        assert_eq!(*v, 1);

        // Fresh-requiring readers see the error.
        let err = cache
            .get_or_fetch("k", ttl, Freshness::Required, || async { Err::<u32, _>(Boom) })
            .await
            .expect_err("must surface");
        assert_eq!(err, Boom);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache: ExpiringCache<&str, u32> = ExpiringCache::new();
        let calls = AtomicU32::new(0);
        let ttl = Duration::from_secs(60);

        for _ in 0..2 {
            cache
                .get_or_fetch("k", ttl, Freshness::Required, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, Boom>(5) }
                })
                .await
                .expect("fetch");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate(&"k");
        cache
            .get_or_fetch("k", ttl, Freshness::Required, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Boom>(5) }
            })
            .await
            .expect("fetch after invalidate");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn forced_refresh_replaces_fresh_value() {
        let cache: ExpiringCache<&str, u32> = ExpiringCache::new();
        let ttl = Duration::from_secs(60);

        cache
            .get_or_fetch("k", ttl, Freshness::Required, || async { Ok::<_, Boom>(1) })
            .await
            .expect("seed");

        let v = cache
            .refresh("k", ttl, || async { Ok::<_, Boom>(2) })
            .await
            .expect("forced");
        assert_eq!(*v, 2);

        let v = cache
            .get_or_fetch::<_, _, Boom>("k", ttl, Freshness::Required, || async {
                panic!("refresh already stored a fresh value")
            })
            .await
            .expect("cached");
        assert_eq!(*v, 2);
    }
}
