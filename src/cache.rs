//! Process-wide keyed memoizing cache.
//!
//! [`Cache::try_get`] returns the stored value for a key while it is live and
//! otherwise runs the supplied computation. Concurrent callers asking for the
//! same missing or expired key share a single computation: the first caller
//! spawns it as its own task and installs a [`Shared`] handle to that task in
//! the slot, and everybody else awaits a clone of the handle. The task runs
//! to completion and settles the slot whether or not anyone is still
//! waiting, so dropping or cancelling callers never leaves a slot pending.
//!
//! # Slot states
//!
//! | State | Meaning | `try_get` behaviour |
//! |-------|---------|---------------------|
//! | `Ready` | value computed, not yet expired | returned without recomputing |
//! | `Pending` | computation in flight | caller joins it |
//! | `Failed` | last computation failed, inside backoff window | recorded error returned |
//!
//! Expired `Ready` and `Failed` slots are recomputed on the next access. With
//! the default (disabled) failure backoff, failures are not stored at all and
//! the next call simply tries again.
//!
//! Values are stored as [`serde_json::Value`] so a single store can serve
//! every route. A computation returning `Option<T>` caches `None` as `null`,
//! which is a hit like any other value.

use crate::backoff::Backoff;
use crate::error::{Error, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Computation = Shared<BoxFuture<'static, Result<Value>>>;

/// Tunables for a [`Cache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long a computed value stays live.
    pub ttl: Duration,
    /// Soft upper bound on the number of slots.
    pub capacity: usize,
    /// How long failed keys are remembered before the next retry.
    pub failure_backoff: Backoff,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 10_000,
            failure_backoff: Backoff::disabled(),
        }
    }
}

/// Counters reported by [`Cache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered from a live value (or a remembered failure).
    pub hits: u64,
    /// Calls that joined a computation started by another caller.
    pub joins: u64,
    /// Calls that started a computation.
    pub misses: u64,
    /// Slots currently held.
    pub entries: usize,
}

enum Slot {
    Ready {
        value: Value,
        stored_at: Instant,
        expires_at: Instant,
    },
    Pending {
        generation: u64,
        computation: Computation,
    },
    Failed {
        error: Error,
        retry_after: Instant,
        failures: u32,
    },
}

enum Lookup {
    Hit(Value),
    Wait(Computation),
    Fail(Error),
}

struct Inner {
    entries: DashMap<String, Slot>,
    settings: CacheSettings,
    next_generation: AtomicU64,
    hits: AtomicU64,
    joins: AtomicU64,
    misses: AtomicU64,
}

/// Cloneable handle to a shared cache store.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("settings", &self.inner.settings)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl Cache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                settings,
                next_generation: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                joins: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Return the live value for `key`, or compute, store and return it.
    ///
    /// `compute` is invoked at most once per miss no matter how many callers
    /// are waiting. Its error is handed to every waiter and is never stored
    /// as a value.
    pub async fn try_get<T, F, Fut>(&self, key: &str, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let value = match self.lookup_or_launch(key, compute) {
            Lookup::Hit(value) => value,
            Lookup::Wait(computation) => computation.await?,
            Lookup::Fail(error) => return Err(error),
        };
        serde_json::from_value(value).map_err(|e| Error::Cache(format!("{key}: {e}")))
    }

    /// Peek at a live value without computing anything.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let now = Instant::now();
        let Some(slot) = self.inner.entries.get(key) else {
            return Ok(None);
        };
        match slot.value() {
            Slot::Ready {
                value, expires_at, ..
            } if *expires_at > now => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::Cache(format!("{key}: {e}"))),
            _ => Ok(None),
        }
    }

    /// Drop whatever is stored for `key`. An in-flight computation still
    /// completes for its waiters but its result is not stored.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            joins: self.inner.joins.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            entries: self.inner.entries.len(),
        }
    }

    /// Remove every expired value and every failure past its retry time.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired(Instant::now())
    }

    /// Periodically purge expired slots in the background.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let purged = inner.purge_expired(Instant::now());
                if purged > 0 {
                    info!(purged, remaining = inner.entries.len(), "Swept expired cache entries");
                }
            }
        })
    }

    fn lookup_or_launch<T, F, Fut>(&self, key: &str, compute: F) -> Lookup
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let now = Instant::now();
        let entry = self.inner.entries.entry(key.to_owned());

        let failures = match &entry {
            Entry::Occupied(occupied) => match occupied.get() {
                Slot::Ready {
                    value, expires_at, ..
                } if *expires_at > now => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "cache hit");
                    return Lookup::Hit(value.clone());
                }
                Slot::Pending { computation, .. } => {
                    self.inner.joins.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "joining in-flight computation");
                    return Lookup::Wait(computation.clone());
                }
                Slot::Failed {
                    error, retry_after, ..
                } if *retry_after > now => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "key is backing off after failure");
                    return Lookup::Fail(error.clone());
                }
                Slot::Failed { failures, .. } => *failures,
                Slot::Ready { .. } => 0,
            },
            Entry::Vacant(_) => 0,
        };

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        debug!(key, generation, "cache miss; computing");

        let computation = Inner::launch(
            Arc::clone(&self.inner),
            key.to_owned(),
            generation,
            failures,
            compute(),
        );
        let slot = Slot::Pending {
            generation,
            computation: computation.clone(),
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.insert(slot);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }
        Lookup::Wait(computation)
    }
}

impl Inner {
    fn launch<T, Fut>(
        inner: Arc<Inner>,
        key: String,
        generation: u64,
        failures: u32,
        fut: Fut,
    ) -> Computation
    where
        T: Serialize + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => serde_json::to_value(value)
                    .map_err(|e| Error::Cache(format!("{task_key}: {e}"))),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::Cache(format!("{task_key}: computation panicked"))),
            };
            inner.settle(&task_key, generation, failures, &outcome);
            outcome
        });
        async move {
            task.await
                .unwrap_or_else(|e| Err(Error::Cache(format!("{key}: computation aborted: {e}"))))
        }
        .boxed()
        .shared()
    }

    /// Replace the `Pending` slot owned by `generation` with the outcome.
    /// Runs on the computation's own task.
    fn settle(&self, key: &str, generation: u64, failures: u32, outcome: &Result<Value>) {
        let now = Instant::now();
        let mut stored = false;

        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let owned = matches!(
                    occupied.get(),
                    Slot::Pending { generation: g, .. } if *g == generation
                );
                if !owned {
                    debug!(key, generation, "slot replaced while computing; result not stored");
                    return;
                }
                match outcome {
                    Ok(value) => {
                        occupied.insert(Slot::Ready {
                            value: value.clone(),
                            stored_at: now,
                            expires_at: now + self.settings.ttl,
                        });
                        stored = true;
                    }
                    Err(error) => {
                        let failures = failures.saturating_add(1);
                        let delay = self.settings.failure_backoff.delay(failures);
                        warn!(key, failures, ?delay, error = %error, "cache computation failed");
                        if delay.is_zero() {
                            occupied.remove();
                        } else {
                            occupied.insert(Slot::Failed {
                                error: error.clone(),
                                retry_after: now + delay,
                                failures,
                            });
                        }
                    }
                }
            }
            Entry::Vacant(_) => {
                debug!(key, generation, "slot invalidated while computing; result not stored");
            }
        }

        if stored {
            self.enforce_capacity();
        }
    }

    fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } => *expires_at > now,
            Slot::Failed { retry_after, .. } => *retry_after > now,
            Slot::Pending { .. } => true,
        });
        before.saturating_sub(self.entries.len())
    }

    fn enforce_capacity(&self) {
        if self.entries.len() <= self.settings.capacity {
            return;
        }
        self.purge_expired(Instant::now());

        let excess = self.entries.len().saturating_sub(self.settings.capacity);
        if excess == 0 {
            return;
        }
        let mut ready: Vec<(Instant, String)> = self
            .entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready { stored_at, .. } => Some((*stored_at, entry.key().clone())),
                _ => None,
            })
            .collect();
        ready.sort_by_key(|(stored_at, _)| *stored_at);

        for (_, key) in ready.into_iter().take(excess) {
            self.entries
                .remove_if(&key, |_, slot| matches!(slot, Slot::Ready { .. }));
        }
        debug!(excess, entries = self.entries.len(), "evicted oldest cache entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<AtomicUsize> {
        Arc::clone(counter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..16).map(|_| {
            let calls = counting(&calls);
            let cache = cache.clone();
            async move {
                cache
                    .try_get("https://x/1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("<p>1</p>".to_string())
                    })
                    .await
            }
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), "<p>1</p>");
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.joins, 15);
    }

    #[tokio::test]
    async fn test_live_value_skips_compute() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = counting(&calls);
            let v: u32 = cache
                .try_get("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(v, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.get::<u32>("k").unwrap(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_value_is_recomputed() {
        let cache = Cache::new(CacheSettings {
            ttl: Duration::from_secs(60),
            ..CacheSettings::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| move || async move {
            Ok::<_, Error>(calls.fetch_add(1, Ordering::SeqCst) + 1)
        };

        assert_eq!(cache.try_get("k", fetch(counting(&calls))).await.unwrap(), 1usize);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.try_get("k", fetch(counting(&calls))).await.unwrap(), 1usize);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.try_get("k", fetch(counting(&calls))).await.unwrap(), 2usize);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .try_get::<String, _, _>("k", {
                let calls = counting(&calls);
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::upstream("https://x/k", "status 502"))
                }
            })
            .await;
        assert!(matches!(first, Err(Error::Upstream { .. })));
        assert!(cache.is_empty());

        let second = cache
            .try_get("k", {
                let calls = counting(&calls);
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("recovered".to_string())
                }
            })
            .await;
        assert_eq!(second.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_share_the_same_failure() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..4).map(|_| {
            let calls = counting(&calls);
            let cache = cache.clone();
            async move {
                cache
                    .try_get::<String, _, _>("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(Error::parse("layout changed"))
                    })
                    .await
            }
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap_err(), Error::parse("layout changed"));
        }
    }

    #[tokio::test]
    async fn test_cached_none_short_circuits() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = counting(&calls);
            let image: Option<String> = cache
                .try_get("https://thumbs/?ids=1", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert_eq!(image, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_backoff_window() {
        let cache = Cache::new(CacheSettings {
            failure_backoff: Backoff::new(Duration::from_secs(10), Duration::from_secs(60))
                .without_jitter(),
            ..CacheSettings::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = |calls: Arc<AtomicUsize>| move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(Error::upstream("https://x", "down"))
        };

        assert!(cache.try_get("k", failing(counting(&calls))).await.is_err());
        assert!(cache.try_get("k", failing(counting(&calls))).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.try_get("k", failing(counting(&calls))).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // second consecutive failure doubles the window
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.try_get("k", failing(counting(&calls))).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.try_get("k", failing(counting(&calls))).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_run_in_parallel() {
        let cache = Cache::default();
        let started = Instant::now();

        let (a, b) = tokio::join!(
            cache.try_get("a", || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(1u8)
            }),
            cache.try_get("b", || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(2u8)
            }),
        );

        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = Cache::new(CacheSettings {
            capacity: 2,
            ..CacheSettings::default()
        });
        for key in ["a", "b", "c"] {
            let _: String = cache
                .try_get(key, move || async move { Ok(key.to_string()) })
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<String>("a").unwrap(), None);
        assert_eq!(cache.get::<String>("c").unwrap(), Some("c".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_starter_does_not_strand_waiters() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let starter = tokio::spawn({
            let cache = cache.clone();
            let calls = counting(&calls);
            async move {
                cache
                    .try_get("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("done".to_string())
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        starter.abort();

        let value = cache
            .try_get("k", {
                let calls = counting(&calls);
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("second".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_computation_outlives_dropped_caller() {
        let cache = Cache::default();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cache.try_get("k", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("done".to_string())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get::<String>("k").unwrap(), Some("done".to_string()));
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_panicking_computation_is_not_stored() {
        let cache = Cache::default();
        let result = cache
            .try_get::<u8, _, _>("k", || async {
                let empty: Vec<u8> = Vec::new();
                Ok(empty[0])
            })
            .await;

        assert!(matches!(result, Err(Error::Cache(_))));
        assert!(cache.is_empty());
        let retried: u8 = cache.try_get("k", || async { Ok(3u8) }).await.unwrap();
        assert_eq!(retried, 3);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_cache_error() {
        let cache = Cache::default();
        let _: u32 = cache.try_get("k", || async { Ok(5u32) }).await.unwrap();
        let wrong = cache
            .try_get::<Vec<String>, _, _>("k", || async { Ok(vec![]) })
            .await;
        assert!(matches!(wrong, Err(Error::Cache(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = Cache::new(CacheSettings {
            ttl: Duration::from_secs(5),
            ..CacheSettings::default()
        });
        let _: u8 = cache.try_get("k", || async { Ok(1u8) }).await.unwrap();
        assert_eq!(cache.purge_expired(), 0);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = Cache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = counting(&calls);
            let _: u8 = cache
                .try_get("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1u8)
                })
                .await
                .unwrap();
            assert!(cache.invalidate("k"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.invalidate("k"));
        assert_eq!(cache.get::<u8>("k").unwrap(), None);
    }
}
