//! Shared key-value / sorted-set store port.
//!
//! Every component that touches shared state receives an
//! `Arc<dyn KvStore>` at construction. The store is expected to apply each
//! single-key primitive atomically; nothing here spans multiple keys.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and by
//! single-replica development deployments. The Redis adapter lives in the
//! web crate.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::deadline::try_guard;
use crate::error::{CoreError, CoreResult};

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Adds `member` to the sorted set at `key` with `score`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> CoreResult<()>;

    /// Removes members whose score lies in `[min, max]`. Returns how many were removed.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> CoreResult<u64>;

    async fn zcard(&self, key: &str) -> CoreResult<u64>;

    /// Sets a time-to-live on `key`. Missing keys are left alone.
    async fn expire(&self, key: &str, seconds: u64) -> CoreResult<()>;

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CoreResult<i64>;

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> CoreResult<()>;

    async fn zincr_by(&self, key: &str, member: &str, delta: f64) -> CoreResult<f64>;

    /// Members ranked from highest score, positions `start..=stop` (negative
    /// indices count from the end).
    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> CoreResult<Vec<(String, f64)>>;

    async fn hgetall(&self, key: &str) -> CoreResult<HashMap<String, String>>;
}

/// A store paired with the deadline applied to every call made through it.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn KvStore>,
    call_deadline: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn KvStore>, call_deadline: Duration) -> Self {
        Self {
            store,
            call_deadline,
        }
    }

    pub fn call_deadline(&self) -> Duration {
        self.call_deadline
    }

    /// Runs one store interaction under the call deadline.
    ///
    /// `op` receives its own reference to the store so the interaction can
    /// outlive the caller if the deadline fires first.
    pub async fn call<T, F, Fut>(&self, label: &str, op: F) -> CoreResult<T>
    where
        F: FnOnce(Arc<dyn KvStore>) -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        try_guard(label, self.call_deadline, op(self.store.clone())).await
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("call_deadline", &self.call_deadline)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Value {
    SortedSet(HashMap<String, f64>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

fn wrong_type(key: &str) -> CoreError {
    CoreError::Store(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

/// In-process store with Redis-like semantics for the primitives above.
///
/// Each operation holds the key's shard lock for its whole duration, so
/// single-key operations are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, simulating an unreachable store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Remaining time-to-live of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Drops every key whose expiry has passed. Returns how many were dropped.
    ///
    /// Expired keys are otherwise only reclaimed when they are touched
    /// again, so a long-running process should call this periodically.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        before.saturating_sub(self.entries.len())
    }

    /// Number of keys held, expired ones included until they are purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.remove_if(key, |_, e| e.is_expired());
        self.entries.contains_key(key)
    }

    async fn enter(&self, key: &str) -> CoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Store("store unavailable".to_string()));
        }
        self.entries.remove_if(key, |_, e| e.is_expired());
        Ok(())
    }

    fn with_sorted_set<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut HashMap<String, f64>) -> R,
    ) -> CoreResult<Option<R>> {
        if create {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::SortedSet(HashMap::new()),
                expires_at: None,
            });
            return match &mut entry.value {
                Value::SortedSet(set) => Ok(Some(f(set))),
                Value::Hash(_) => Err(wrong_type(key)),
            };
        }
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(mut entry) => match &mut entry.value {
                Value::SortedSet(set) => Ok(Some(f(set))),
                Value::Hash(_) => Err(wrong_type(key)),
            },
        }
    }

    fn with_hash<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut HashMap<String, String>) -> R,
    ) -> CoreResult<Option<R>> {
        if create {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            return match &mut entry.value {
                Value::Hash(hash) => Ok(Some(f(hash))),
                Value::SortedSet(_) => Err(wrong_type(key)),
            };
        }
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(mut entry) => match &mut entry.value {
                Value::Hash(hash) => Ok(Some(f(hash))),
                Value::SortedSet(_) => Err(wrong_type(key)),
            },
        }
    }

    /// Drops a sorted set that became empty, as Redis does.
    fn drop_if_empty(&self, key: &str) {
        self.entries.remove_if(key, |_, e| match &e.value {
            Value::SortedSet(set) => set.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
        });
    }
}

/// Resolves Redis-style inclusive `start..=stop` indices against `len`.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> CoreResult<()> {
        self.enter(key).await?;
        self.with_sorted_set(key, true, |set| {
            set.insert(member.to_string(), score);
        })?;
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> CoreResult<u64> {
        self.enter(key).await?;
        let removed = self
            .with_sorted_set(key, false, |set| {
                let before = set.len();
                set.retain(|_, score| *score < min || *score > max);
                (before - set.len()) as u64
            })?
            .unwrap_or(0);
        self.drop_if_empty(key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> CoreResult<u64> {
        self.enter(key).await?;
        Ok(self
            .with_sorted_set(key, false, |set| set.len() as u64)?
            .unwrap_or(0))
    }

    async fn expire(&self, key: &str, seconds: u64) -> CoreResult<()> {
        self.enter(key).await?;
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CoreResult<i64> {
        self.enter(key).await?;
        let result = self.with_hash(key, true, |hash| -> CoreResult<i64> {
            let current = match hash.get(field) {
                None => 0,
                Some(raw) => raw.parse::<i64>().map_err(|_| {
                    CoreError::Store(format!("hash value at '{key}.{field}' is not an integer"))
                })?,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })?;
        result.unwrap_or(Ok(delta))
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> CoreResult<()> {
        self.enter(key).await?;
        self.with_hash(key, true, |hash| {
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        })?;
        Ok(())
    }

    async fn zincr_by(&self, key: &str, member: &str, delta: f64) -> CoreResult<f64> {
        self.enter(key).await?;
        Ok(self
            .with_sorted_set(key, true, |set| {
                let score = set.entry(member.to_string()).or_insert(0.0);
                *score += delta;
                *score
            })?
            .unwrap_or(delta))
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> CoreResult<Vec<(String, f64)>> {
        self.enter(key).await?;
        let ranked = self
            .with_sorted_set(key, false, |set| {
                let mut all: Vec<(String, f64)> =
                    set.iter().map(|(m, s)| (m.clone(), *s)).collect();
                all.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
                all
            })?
            .unwrap_or_default();

        Ok(match resolve_range(ranked.len(), start, stop) {
            Some((from, to)) => ranked[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn hgetall(&self, key: &str) -> CoreResult<HashMap<String, String>> {
        self.enter(key).await?;
        Ok(self
            .with_hash(key, false, |hash| hash.clone())?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sorted_set_add_count_and_evict() {
        let store = MemoryStore::new();
        store.zadd("k", "a", 10.0).await.unwrap();
        store.zadd("k", "b", 20.0).await.unwrap();
        store.zadd("k", "c", 30.0).await.unwrap();
        assert_eq!(store.zcard("k").await.unwrap(), 3);

        let removed = store.zrem_range_by_score("k", 0.0, 20.0).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.zcard("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zadd_same_member_updates_score() {
        let store = MemoryStore::new();
        store.zadd("k", "a", 1.0).await.unwrap();
        store.zadd("k", "a", 2.0).await.unwrap();
        assert_eq!(store.zcard("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_key_reads_as_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.zcard("nope").await.unwrap(), 0);
        assert!(store.hgetall("nope").await.unwrap().is_empty());
        assert!(store
            .zrevrange_with_scores("nope", 0, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.zrem_range_by_score("nope", 0.0, 1.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn emptied_sorted_set_is_removed() {
        let store = MemoryStore::new();
        store.zadd("k", "a", 1.0).await.unwrap();
        store.zrem_range_by_score("k", 0.0, 5.0).await.unwrap();
        assert!(!store.contains_key("k"));
    }

    #[tokio::test]
    async fn hash_increment_and_set() {
        let store = MemoryStore::new();
        assert_eq!(store.hincr_by("user:1", "wins", 1).await.unwrap(), 1);
        assert_eq!(store.hincr_by("user:1", "wins", 2).await.unwrap(), 3);
        store
            .hset_multiple(
                "user:1",
                &[("username".to_string(), "alice".to_string())],
            )
            .await
            .unwrap();

        let hash = store.hgetall("user:1").await.unwrap();
        assert_eq!(hash.get("wins").map(String::as_str), Some("3"));
        assert_eq!(hash.get("username").map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn hincr_on_non_integer_fails() {
        let store = MemoryStore::new();
        store
            .hset_multiple("h", &[("f".to_string(), "abc".to_string())])
            .await
            .unwrap();
        assert!(store.hincr_by("h", "f", 1).await.is_err());
    }

    #[tokio::test]
    async fn type_mismatch_is_an_error() {
        let store = MemoryStore::new();
        store.zadd("k", "a", 1.0).await.unwrap();
        assert!(store.hincr_by("k", "f", 1).await.is_err());
        assert!(store.hgetall("k").await.is_err());
    }

    #[tokio::test]
    async fn reverse_range_orders_by_score() {
        let store = MemoryStore::new();
        store.zincr_by("lb", "1", 3.0).await.unwrap();
        store.zincr_by("lb", "2", 5.0).await.unwrap();
        store.zincr_by("lb", "3", 1.0).await.unwrap();
        assert_eq!(store.zincr_by("lb", "3", 1.0).await.unwrap(), 2.0);

        let top = store.zrevrange_with_scores("lb", 0, 1).await.unwrap();
        assert_eq!(
            top,
            vec![("2".to_string(), 5.0), ("1".to_string(), 3.0)]
        );

        let all = store.zrevrange_with_scores("lb", 0, -1).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].0, "3");
    }

    #[test]
    fn range_resolution() {
        assert_eq!(resolve_range(5, 0, 2), Some((0, 2)));
        assert_eq!(resolve_range(5, 0, 99), Some((0, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(0, 0, 10), None);
        assert_eq!(resolve_range(2, 5, 10), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_disappear() {
        let store = MemoryStore::new();
        store.zadd("k", "a", 1.0).await.unwrap();
        store.expire("k", 2).await.unwrap();
        assert!(store.ttl("k").is_some());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(store.zcard("k").await.unwrap(), 0);
        assert!(!store.contains_key("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_limiter_keys_are_purged() {
        use crate::clock::ManualClock;
        use crate::limiter::{FailMode, LimiterKey, RateRule, Scope, SlidingWindowLimiter};

        let store = Arc::new(MemoryStore::new());
        let handle = StoreHandle::new(store.clone(), Duration::from_secs(1));
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = SlidingWindowLimiter::new(handle, Arc::new(clock.clone()), FailMode::Open);

        for n in 0..1000 {
            let key = LimiterKey::new(Scope::LeaderboardOrigin, format!("198.51.100.{n}"));
            limiter.check(&key, RateRule::per_minute(10)).await;
        }
        assert_eq!(store.len(), 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        clock.advance(Duration::from_secs(3600));
        let fresh = LimiterKey::new(Scope::LeaderboardOrigin, "203.0.113.1");
        limiter.check(&fresh, RateRule::per_minute(10)).await;

        assert_eq!(store.purge_expired(), 1000);
        assert_eq!(store.len(), 1);
        assert!(store.contains_key(&fresh.store_key()));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_keeps_keys_without_expiry_or_still_live() {
        let store = MemoryStore::new();
        store.hincr_by("user:1", "wins", 1).await.unwrap();
        store.zadd("short", "a", 1.0).await.unwrap();
        store.expire("short", 1).await.unwrap();
        store.zadd("long", "a", 1.0).await.unwrap();
        store.expire("long", 60).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.contains_key("user:1"));
        assert!(store.contains_key("long"));
        assert!(!store.contains_key("short"));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_applies_call_deadline() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Duration::from_millis(500));
        let handle = StoreHandle::new(store.clone(), Duration::from_millis(100));

        let err = handle
            .call("zcard", |s| async move { s.zcard("k").await })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_write_still_lands() {
        let store = Arc::new(MemoryStore::new());
        store.set_latency(Duration::from_millis(300));
        let handle = StoreHandle::new(store.clone(), Duration::from_millis(50));

        let result = handle
            .call("zadd", |s| async move { s.zadd("k", "late", 1.0).await })
            .await;
        assert!(result.unwrap_err().is_timeout());

        tokio::time::sleep(Duration::from_millis(500)).await;
        store.set_latency(Duration::ZERO);
        assert_eq!(store.zcard("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.zadd("k", "a", 1.0).await.is_err());
        assert!(store.zcard("k").await.is_err());
        assert!(store.hgetall("k").await.is_err());

        store.set_unavailable(false);
        assert!(store.zcard("k").await.is_ok());
    }
}
