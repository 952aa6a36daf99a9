//! Session cache with time based eviction
//!
//! Entries carry the time they were last touched. A background task sweeps the map every
//! `sweep_interval` and closes the entries that the `EvictionPolicy` selects.

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, trace};
use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};

/// Resource that could be closed when it is evicted from the cache
pub trait Closeable {
    /// Release the resource. Called exactly once for every resource that leaves the cache.
    fn close(&self);
}

impl<T: Closeable + ?Sized> Closeable for Arc<T> {
    fn close(&self) {
        (**self).close()
    }
}

/// Decides which entries are evicted by a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Evict entries that have not been touched for at least `timeout`
    #[default]
    IdleLongerThanTimeout,
    /// Evict entries that have been touched within the last `timeout`
    ///
    /// This is the inverse comparison observed in older relays, which sweeps fresh
    /// entries and keeps stale ones.
    IdleShorterThanTimeout,
}

impl EvictionPolicy {
    fn should_evict(self, idle: Duration, timeout: Duration) -> bool {
        match self {
            EvictionPolicy::IdleLongerThanTimeout => idle >= timeout,
            EvictionPolicy::IdleShorterThanTimeout => idle < timeout,
        }
    }
}

struct CacheEntry<V> {
    value: V,
    last_touched: Instant,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    destroyed: bool,
}

type SharedInner<K, V> = Arc<Mutex<CacheInner<K, V>>>;

fn lock<K, V>(inner: &Mutex<CacheInner<K, V>>) -> MutexGuard<'_, CacheInner<K, V>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Time keyed store of closeable resources
///
/// Must be created inside a tokio runtime, because the sweeper is a spawned task.
pub struct SessionCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + 'static,
    V: Closeable + Clone + Send + 'static,
{
    inner: SharedInner<K, V>,
    timeout: Duration,
    policy: EvictionPolicy,
    sweeper: JoinHandle<()>,
}

impl<K, V> SessionCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + 'static,
    V: Closeable + Clone + Send + 'static,
{
    /// Create a cache evicting entries idle for at least `timeout`, checked every `sweep_interval`
    pub fn new(timeout: Duration, sweep_interval: Duration) -> SessionCache<K, V> {
        SessionCache::with_policy(timeout, sweep_interval, EvictionPolicy::default())
    }

    /// Create a cache with an explicit eviction policy
    pub fn with_policy(timeout: Duration, sweep_interval: Duration, policy: EvictionPolicy) -> SessionCache<K, V> {
        let inner = Arc::new(Mutex::new(CacheInner {
            entries: HashMap::new(),
            destroyed: false,
        }));

        let sweeper = tokio::spawn(Self::sweep_task(inner.clone(), timeout, sweep_interval, policy));

        SessionCache {
            inner,
            timeout,
            policy,
            sweeper,
        }
    }

    async fn sweep_task(inner: SharedInner<K, V>, timeout: Duration, sweep_interval: Duration, policy: EvictionPolicy) {
        let mut interval = time::interval_at(Instant::now() + sweep_interval, sweep_interval);

        loop {
            interval.tick().await;

            let evicted = {
                let mut inner = lock(&inner);
                if inner.destroyed {
                    break;
                }

                let now = Instant::now();
                let expired = inner
                    .entries
                    .iter()
                    .filter(|(_, e)| policy.should_evict(now - e.last_touched, timeout))
                    .map(|(k, _)| k.clone())
                    .collect::<Vec<K>>();

                expired
                    .into_iter()
                    .filter_map(|k| inner.entries.remove(&k).map(|e| (k, e.value)))
                    .collect::<Vec<(K, V)>>()
            };

            for (key, value) in evicted {
                trace!("session cache evicted {:?}", key);
                value.close();
            }
        }
    }

    /// Idle timeout of entries
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Eviction policy of the sweeper
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Insert or replace `key`. A replaced resource is closed.
    ///
    /// A destroyed cache closes `value` immediately.
    pub fn set(&self, key: K, value: V) {
        let replaced = {
            let mut inner = lock(&self.inner);
            if inner.destroyed {
                Some(value)
            } else {
                let entry = CacheEntry {
                    value,
                    last_touched: Instant::now(),
                };
                inner.entries.insert(key, entry).map(|e| e.value)
            }
        };

        if let Some(value) = replaced {
            value.close();
        }
    }

    /// Get a clone of the resource of `key`. Doesn't refresh its touched time.
    pub fn get(&self, key: &K) -> Option<V> {
        lock(&self.inner).entries.get(key).map(|e| e.value.clone())
    }

    /// Refresh the touched time of `key`
    pub fn touch(&self, key: &K) -> bool {
        match lock(&self.inner).entries.get_mut(key) {
            Some(entry) => {
                entry.last_touched = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove `key` and close its resource
    pub fn delete(&self, key: &K) -> bool {
        let removed = lock(&self.inner).entries.remove(key);
        match removed {
            Some(entry) => {
                entry.value.close();
                true
            }
            None => false,
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Whether there is no live entry
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the sweeper and close every remaining resource
    pub fn destroy(&self) {
        self.sweeper.abort();

        let drained = {
            let mut inner = lock(&self.inner);
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.entries.drain().map(|(_, e)| e.value).collect::<Vec<V>>()
        };

        debug!("session cache destroyed, closing {} entries", drained.len());
        for value in drained {
            value.close();
        }
    }
}

impl<K, V> Drop for SessionCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + 'static,
    V: Closeable + Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Resource {
        closed: AtomicUsize,
    }

    impl Resource {
        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Closeable for Resource {
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(30);
    const SWEEP: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle() {
        let cache = SessionCache::new(TIMEOUT, SWEEP);
        let res = Arc::new(Resource::default());
        cache.set("flow", res.clone());

        time::sleep(Duration::from_secs(25)).await;
        assert!(cache.get(&"flow").is_some());
        assert_eq!(res.closed(), 0);

        time::sleep(Duration::from_secs(10)).await;
        assert!(cache.get(&"flow").is_none());
        assert_eq!(res.closed(), 1);

        cache.destroy();
        assert_eq!(res.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_keeps_entry() {
        let cache = SessionCache::new(TIMEOUT, SWEEP);
        let res = Arc::new(Resource::default());
        cache.set(1u32, res.clone());

        for _ in 0..6 {
            time::sleep(Duration::from_secs(20)).await;
            assert!(cache.touch(&1));
        }
        assert_eq!(res.closed(), 0);

        // `get` is not a touch
        for _ in 0..4 {
            time::sleep(Duration::from_secs(10)).await;
            let _ = cache.get(&1);
        }
        assert!(cache.is_empty());
        assert_eq!(res.closed(), 1);
        assert!(!cache.touch(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_fresh_policy() {
        let cache = SessionCache::with_policy(TIMEOUT, SWEEP, EvictionPolicy::IdleShorterThanTimeout);
        let res = Arc::new(Resource::default());
        cache.set("flow", res.clone());

        // Swept on the first tick, because it has been idle for less than `TIMEOUT`
        time::sleep(Duration::from_secs(11)).await;
        assert!(cache.get(&"flow").is_none());
        assert_eq!(res.closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_delete_destroy() {
        let cache = SessionCache::new(TIMEOUT, SWEEP);

        let first = Arc::new(Resource::default());
        let second = Arc::new(Resource::default());
        cache.set("k", first.clone());
        cache.set("k", second.clone());
        assert_eq!(first.closed(), 1);
        assert_eq!(second.closed(), 0);

        assert!(cache.delete(&"k"));
        assert!(!cache.delete(&"k"));
        assert_eq!(second.closed(), 1);

        let third = Arc::new(Resource::default());
        cache.set("k", third.clone());
        cache.destroy();
        cache.destroy();
        drop(cache);
        assert_eq!(third.closed(), 1);
    }
}
