//! Process-wide query cache for guard data.
//!
//! Entries are keyed by `QueryKey`. A fresh hit is served without a fetch, a
//! stale hit is served immediately while a background refetch runs, and a
//! miss fetches in the foreground. At most one fetch per key is in flight.

mod policy;

pub use policy::*;

use crate::api::ApiError;

use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
    last_accessed: Instant,
    /// Set by `invalidate`; the next read refetches in the foreground.
    invalidated: bool,
}

impl Entry {
    fn new(value: Arc<dyn Any + Send + Sync>) -> Self {
        let now = Instant::now();
        Self {
            value,
            fetched_at: now,
            last_accessed: now,
            invalidated: false,
        }
    }
}

/// Render state of one query, as a view would consume it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum QueryState<T> {
    /// Never fetched and nothing in flight.
    Idle,
    Loading,
    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        /// Last good value, still usable for display.
        stale_data: Option<T>,
    },
    Success { data: T },
}

/// Shared cache of guard queries. Hand it around as `Arc<QueryCache>`.
pub struct QueryCache {
    entries: RwLock<HashMap<QueryKey, Entry>>,
    inflight: Mutex<HashMap<QueryKey, Arc<Mutex<()>>>>,
    retry: RetryPolicy,
    stop: Mutex<Option<broadcast::Sender<()>>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl QueryCache {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            retry,
            stop: Mutex::new(None),
        }
    }

    /// Read through the cache.
    ///
    /// `fetcher` is called once per attempt, so it must be re-invocable.
    pub async fn fetch<T, F, Fut>(self: &Arc<Self>, key: QueryKey, fetcher: F) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let requested_at = Instant::now();
        let hit = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&key) {
                Some(entry) if !entry.invalidated => {
                    entry.last_accessed = requested_at;
                    let stale = requested_at.duration_since(entry.fetched_at) >= key.policy().stale_time;
                    entry.value.downcast_ref::<T>().cloned().map(|v| (v, stale))
                }
                _ => None,
            }
        };

        match hit {
            Some((value, false)) => Ok(value),
            Some((value, true)) => {
                tracing::debug!("Serving stale {} while refetching", key);
                let cache = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = cache.load(&key, &fetcher, requested_at).await {
                        tracing::warn!("Background refetch of {} failed: {}", key, e);
                    }
                });
                Ok(value)
            }
            None => {
                // Detached so a dropped caller still stores the result.
                let cache = Arc::clone(self);
                tokio::spawn(async move { cache.load(&key, &fetcher, requested_at).await })
                    .await
                    .map_err(|e| ApiError::Transport(format!("fetch task failed: {}", e)))?
            }
        }
    }

    /// Always hit the network, bypassing freshness.
    pub async fn refetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.load(&key, &fetcher, Instant::now()).await
    }

    /// Like `fetch`, but folds the outcome into a `QueryState`, keeping the
    /// last cached value available on error.
    pub async fn query<T, F, Fut>(self: &Arc<Self>, key: QueryKey, fetcher: F) -> QueryState<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        match self.fetch(key.clone(), fetcher).await {
            Ok(data) => QueryState::Success { data },
            Err(e) => QueryState::Error {
                error: e.to_string(),
                stale_data: self.get_query_data(&key).await,
            },
        }
    }

    /// Current state without triggering a fetch.
    pub async fn peek<T: Clone + Send + Sync + 'static>(&self, key: &QueryKey) -> QueryState<T> {
        if let Some(data) = self.get_query_data(key).await {
            return QueryState::Success { data };
        }
        let lock = self.inflight.lock().await.get(key).cloned();
        match lock {
            Some(lock) if lock.try_lock().is_err() => QueryState::Loading,
            _ => QueryState::Idle,
        }
    }

    /// Fetch under the per-key lock, unless someone else already stored a
    /// value after `requested_at`.
    async fn load<T, F, Fut>(&self, key: &QueryKey, fetcher: &F, requested_at: Instant) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.clone()).or_default())
        };
        let _guard = lock.lock().await;

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(key) {
                if !entry.invalidated && entry.fetched_at > requested_at {
                    if let Some(value) = entry.value.downcast_ref::<T>().cloned() {
                        entry.last_accessed = Instant::now();
                        return Ok(value);
                    }
                }
            }
        }

        let value = self.run_with_retry(key, fetcher).await?;
        self.set_query_data(key, value.clone()).await;
        Ok(value)
    }

    async fn run_with_retry<T, F, Fut>(&self, key: &QueryKey, fetcher: &F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match fetcher().await {
                Ok(value) => return Ok(value),
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "Query {} failed (attempt {}): {}; retrying in {:?}",
                        key,
                        attempt + 1,
                        e,
                        delay
                    );
                    // Jitter
                    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
                    tokio::time::sleep(delay + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // --- Direct access ---

    pub async fn get_query_data<T: Clone + Send + Sync + 'static>(&self, key: &QueryKey) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .and_then(|entry| entry.value.downcast_ref::<T>().cloned())
    }

    /// Store `value` as freshly fetched.
    pub async fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T) {
        let mut entries = self.entries.write().await;
        entries.insert(key.clone(), Entry::new(Arc::new(value)));
    }

    /// Mark one key for a foreground refetch on next read. Data stays readable.
    pub async fn invalidate(&self, key: &QueryKey) {
        if let Some(entry) = self.entries.write().await.get_mut(key) {
            entry.invalidated = true;
        }
    }

    /// Invalidate every key of `resource`.
    pub async fn invalidate_resource(&self, resource: Resource) -> usize {
        let mut entries = self.entries.write().await;
        let mut count = 0;
        for (_, entry) in entries.iter_mut().filter(|(k, _)| k.resource == resource) {
            entry.invalidated = true;
            count += 1;
        }
        tracing::debug!("Invalidated {} {} queries", count, resource.name());
        count
    }

    pub async fn remove(&self, key: &QueryKey) {
        self.entries.write().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop entries idle for longer than their GC window, plus idle fetch locks.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let evicted = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|key, entry| now.duration_since(entry.last_accessed) < key.policy().gc_time);
            before - entries.len()
        };

        let mut inflight = self.inflight.lock().await;
        inflight.retain(|_, lock| Arc::strong_count(lock) > 1);

        if evicted > 0 {
            tracing::info!("QueryCache: evicted {} idle entries", evicted);
        }
        evicted
    }

    // --- Background GC ---

    /// Start the periodic GC sweep.
    pub async fn start_gc(self: &Arc<Self>, every: Duration) {
        let (tx, mut rx) = broadcast::channel(1);
        {
            let mut stop = self.stop.lock().await;
            if stop.is_some() {
                return;
            }
            *stop = Some(tx);
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        cache.evict_expired().await;
                    }
                }
            }
        });
    }

    /// Stop the GC sweep.
    pub async fn stop_gc(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn key(id: &str) -> QueryKey {
        QueryKey::new(Resource::Guard, [id])
    }

    fn counting(
        hits: &Arc<AtomicUsize>,
        result: Result<u32, ApiError>,
    ) -> impl Fn() -> std::future::Ready<Result<u32, ApiError>> + Send + Sync + 'static {
        let hits = Arc::clone(hits);
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            std::future::ready(result.clone())
        }
    }

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            status: code,
            message: "boom".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_skips_fetch() {
        let cache = Arc::new(QueryCache::default());
        let hits = Arc::new(AtomicUsize::new(0));

        assert_eq!(assert_ok!(cache.fetch(key("g1"), counting(&hits, Ok(7))).await), 7);
        assert_eq!(assert_ok!(cache.fetch(key("g1"), counting(&hits, Ok(8))).await), 7);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_hit_serves_cached_and_refetches() {
        let cache = Arc::new(QueryCache::default());
        let hits = Arc::new(AtomicUsize::new(0));
        cache.fetch(key("g1"), counting(&hits, Ok(1))).await.unwrap();

        tokio::time::advance(Resource::Guard.policy().stale_time).await;
        let served = cache.fetch(key("g1"), counting(&hits, Ok(2))).await.unwrap();
        assert_eq!(served, 1);

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_query_data::<u32>(&key("g1")).await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retry_twice_with_backoff() {
        let cache = Arc::new(QueryCache::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        assert_err!(cache.fetch(key("g1"), counting(&hits, Err(status(500)))).await);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_errors_do_not_retry() {
        let cache = Arc::new(QueryCache::default());
        for code in [401, 403, 404, 422] {
            let hits = Arc::new(AtomicUsize::new(0));
            let err = cache
                .fetch(key(&code.to_string()), counting(&hits, Err(status(code))))
                .await
                .unwrap_err();
            assert_eq!(err.status(), Some(code));
            assert_eq!(hits.load(Ordering::SeqCst), 1, "{code}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let cache = Arc::new(QueryCache::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let slow = {
            let hits = Arc::clone(&hits);
            move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, ApiError>(42u32)
                }
            }
        };

        let (a, b) = tokio::join!(
            cache.fetch(key("g1"), slow.clone()),
            cache.fetch(key("g1"), slow)
        );
        assert_eq!((a.unwrap(), b.unwrap()), (42, 42));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_state_keeps_stale_data() {
        let cache = Arc::new(QueryCache::default());
        let hits = Arc::new(AtomicUsize::new(0));
        cache.set_query_data(&key("g1"), 5u32).await;
        cache.invalidate(&key("g1")).await;

        let state = cache.query(key("g1"), counting(&hits, Err(status(404)))).await;
        assert_eq!(
            state,
            QueryState::Error {
                error: status(404).to_string(),
                stale_data: Some(5),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_resource_forces_refetch() {
        let cache = Arc::new(QueryCache::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let list = QueryKey::new(Resource::GuardList, ["agency-1"]);
        cache.fetch(list.clone(), counting(&hits, Ok(1))).await.unwrap();
        cache.set_query_data(&key("g1"), 9u32).await;

        assert_eq!(cache.invalidate_resource(Resource::GuardList).await, 1);
        assert_eq!(cache.fetch(list, counting(&hits, Ok(2))).await.unwrap(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_query_data::<u32>(&key("g1")).await, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_entries_are_evicted() {
        let cache = Arc::new(QueryCache::default());
        cache.set_query_data(&QueryKey::new(Resource::GuardList, Vec::<String>::new()), 1u32).await;
        cache.set_query_data(&QueryKey::new(Resource::GuardProfile, ["g1"]), 2u32).await;

        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        assert_eq!(cache.evict_expired().await, 1);
        assert_eq!(cache.len().await, 1);

        assert!(matches!(
            cache.peek::<u32>(&QueryKey::new(Resource::GuardList, Vec::<String>::new())).await,
            QueryState::Idle
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_sweeper_runs_until_stopped() {
        let cache = Arc::new(QueryCache::default());
        cache.set_query_data(&key("g1"), 1u32).await;
        cache.start_gc(Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        assert!(cache.is_empty().await);

        cache.stop_gc().await;
        cache.set_query_data(&key("g2"), 1u32).await;
        tokio::time::sleep(Duration::from_secs(16 * 60)).await;
        assert_eq!(cache.len().await, 1);
    }
}
