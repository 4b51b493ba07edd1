//! Query client: typed access to the cache with network fallback.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, CacheEvent, EntryKind};
use super::key::QueryKey;
use super::storage::CacheStorage;
use crate::api::Page;
use crate::error::Result;

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

/// How failed query fetches are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Extra attempts after the first failure
  pub retries: u32,
  pub base_delay: std::time::Duration,
  pub max_delay: std::time::Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retries: 3,
      base_delay: std::time::Duration::from_secs(1),
      max_delay: std::time::Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  pub fn none() -> Self {
    Self {
      retries: 0,
      ..Self::default()
    }
  }

  /// Backoff before retry number `attempt` (0-based): doubles each time, capped.
  pub fn delay(&self, attempt: u32) -> std::time::Duration {
    let factor = 2u32.saturating_pow(attempt);
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }
}

struct InFlight {
  id: u64,
  key: QueryKey,
  fetch: SharedFetch,
}

struct ClientState {
  /// Unfinished fetches by key hash. A fetch missing from here when it
  /// finishes was detached by an invalidation.
  in_flight: Mutex<HashMap<String, InFlight>>,
  events: broadcast::Sender<CacheEvent>,
  next_fetch_id: AtomicU64,
}

impl ClientState {
  fn in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
    self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Shared handle to the query cache.
///
/// Reads serve fresh entries directly; stale or missing entries are fetched,
/// with concurrent fetches of the same key coalesced into one request.
/// Mutations never write through this client: they invalidate a prefix and
/// observers refetch.
#[derive(Clone)]
pub struct QueryClient {
  storage: Arc<dyn CacheStorage>,
  state: Arc<ClientState>,
  /// How long before cached data is considered stale
  stale_time: Duration,
  retry: RetryPolicy,
}

impl QueryClient {
  /// Create a client over the given storage. Data is stale immediately and
  /// failed fetches are retried three times.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self::from_storage(Arc::new(storage))
  }

  pub fn from_storage(storage: Arc<dyn CacheStorage>) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      storage,
      state: Arc::new(ClientState {
        in_flight: Mutex::new(HashMap::new()),
        events,
        next_fetch_id: AtomicU64::new(0),
      }),
      stale_time: Duration::zero(),
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_stale_time(mut self, stale_time: std::time::Duration) -> Self {
    self.stale_time = Duration::from_std(stale_time).unwrap_or_else(|_| Duration::days(36_500));
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Receive cache events (updates, invalidations, removals).
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.state.events.subscribe()
  }

  /// Read the raw entry under exactly this key.
  pub fn get_entry(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    self.storage.get(key)
  }

  /// Read the cached value under this key, fresh or not.
  pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<T>> {
    match self.storage.get(key)? {
      Some(entry) => entry.decode().map(Some),
      None => Ok(None),
    }
  }

  /// Store a value as if it had just been fetched.
  pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, kind: EntryKind, data: &T) -> Result<()> {
    let value = serde_json::to_value(data)?;
    self.storage.put(key, &CacheEntry::new(kind, value))?;
    self.emit(CacheEvent::Updated { key: key.clone() });
    Ok(())
  }

  /// Whether the entry under `key` can be served without a fetch.
  pub fn is_fresh(&self, key: &QueryKey) -> bool {
    match self.storage.get(key) {
      Ok(Some(entry)) => !entry.is_stale(self.stale_time),
      _ => false,
    }
  }

  /// Look for a record in the list and page entries cached under `prefix`.
  ///
  /// The full-collection entry (keyed by exactly `prefix`) is searched first,
  /// then pages from newest to oldest. Item entries are not consulted.
  pub fn find_in_collection<T, P>(&self, prefix: &QueryKey, predicate: P) -> Result<Option<T>>
  where
    T: DeserializeOwned,
    P: Fn(&T) -> bool,
  {
    let mut entries: Vec<(QueryKey, CacheEntry)> = self
      .storage
      .entries_with_prefix(prefix)?
      .into_iter()
      .filter(|(_, entry)| entry.kind != EntryKind::Item)
      .collect();
    entries.sort_by_key(|(key, entry)| (key != prefix, std::cmp::Reverse(entry.cached_at)));

    for (key, entry) in entries {
      let records: Vec<T> = match entry.kind {
        EntryKind::List => entry.decode(),
        EntryKind::Page => entry.decode::<Page<T>>().map(|page| page.items),
        EntryKind::Item => continue,
      }
      .unwrap_or_else(|err| {
        debug!(key = %key, error = %err, "skipping undecodable collection entry");
        Vec::new()
      });

      if let Some(found) = records.into_iter().find(|record| predicate(record)) {
        return Ok(Some(found));
      }
    }

    Ok(None)
  }

  /// Fetch a query through the cache.
  ///
  /// 1. A fresh entry is returned without calling `fetcher`
  /// 2. Otherwise join an in-flight fetch for the same key, or start one
  /// 3. A successful fetch is stored and announced with `CacheEvent::Updated`
  pub async fn fetch_query<T, F, Fut>(&self, key: &QueryKey, kind: EntryKind, fetcher: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    match self.storage.get(key) {
      Ok(Some(entry)) if !entry.is_stale(self.stale_time) => {
        debug!(key = %key, "serving fresh cache entry");
        if let Ok(data) = entry.decode() {
          return Ok(data);
        }
      }
      Ok(_) => {}
      Err(err) => warn!(key = %key, error = %err, "cache read failed, fetching"),
    }

    let value = self.shared_fetch(key, kind, fetcher).await?;
    Ok(serde_json::from_value(value)?)
  }

  fn shared_fetch<T, F, Fut>(&self, key: &QueryKey, kind: EntryKind, fetcher: F) -> SharedFetch
  where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let hash = key.cache_hash();
    let mut in_flight = self.state.in_flight();
    if let Some(existing) = in_flight.get(&hash) {
      debug!(key = %key, "joining in-flight fetch");
      return existing.fetch.clone();
    }

    let id = self.state.next_fetch_id.fetch_add(1, Ordering::SeqCst);
    let client = self.clone();
    let owned_key = key.clone();
    let owned_hash = hash.clone();

    let fetch = async move {
      let started_at = Utc::now();
      let result = client
        .run_with_retry(&owned_key, &fetcher)
        .await
        .and_then(|data| Ok(serde_json::to_value(data)?));

      // Stored under the lock so an invalidation lands wholly before or after.
      let mut in_flight = client.state.in_flight();
      let detached = !in_flight.get(&owned_hash).is_some_and(|f| f.id == id);
      if let Ok(value) = &result {
        client.store_fetched(&owned_key, kind, value.clone(), detached, started_at);
      }
      if !detached {
        in_flight.remove(&owned_hash);
      }
      result
    }
    .boxed()
    .shared();

    in_flight.insert(
      hash,
      InFlight {
        id,
        key: key.clone(),
        fetch: fetch.clone(),
      },
    );
    fetch
  }

  async fn run_with_retry<T, F, Fut>(&self, key: &QueryKey, fetcher: &F) -> Result<T>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt = 0;
    loop {
      match fetcher().await {
        Ok(data) => return Ok(data),
        Err(err) if attempt < self.retry.retries && err.is_retryable() => {
          let delay = self.retry.delay(attempt);
          warn!(key = %key, attempt = attempt + 1, error = %err, "fetch failed, retrying in {:?}", delay);
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(err) => {
          debug!(key = %key, error = %err, "fetch failed");
          return Err(err);
        }
      }
    }
  }

  /// A detached fetch may have read data from before the invalidation: it is
  /// stored flagged stale, and dropped if something newer was stored since
  /// it started.
  fn store_fetched(
    &self,
    key: &QueryKey,
    kind: EntryKind,
    value: Value,
    detached: bool,
    started_at: DateTime<Utc>,
  ) {
    if detached {
      if let Ok(Some(current)) = self.storage.get(key) {
        if current.cached_at > started_at {
          debug!(key = %key, "dropping detached fetch result, newer data is cached");
          return;
        }
      }
    }

    let mut entry = CacheEntry::new(kind, value);
    entry.invalidated = detached;
    if let Err(err) = self.storage.put(key, &entry) {
      warn!(key = %key, error = %err, "failed to store fetched data");
      return;
    }
    self.emit(CacheEvent::Updated { key: key.clone() });
  }

  /// Flag every entry whose key starts with `prefix` as stale.
  ///
  /// In-flight fetches under the prefix are detached so the next observer
  /// starts a new request; their results are stored already invalidated.
  /// Fetches of other keys are untouched. Nothing is detached if the storage
  /// update fails.
  pub fn invalidate_queries(&self, prefix: &QueryKey) -> Result<usize> {
    let count = {
      let mut in_flight = self.state.in_flight();
      let count = self.storage.invalidate_prefix(prefix)?;
      in_flight.retain(|_, f| !f.key.starts_with(prefix));
      count
    };
    info!(prefix = %prefix, count, "invalidated queries");
    self.emit(CacheEvent::Invalidated {
      prefix: prefix.clone(),
      count,
    });
    Ok(count)
  }

  /// Drop every entry whose key starts with `prefix`.
  pub fn remove_queries(&self, prefix: &QueryKey) -> Result<usize> {
    let count = self.storage.remove_prefix(prefix)?;
    info!(prefix = %prefix, count, "removed queries");
    self.emit(CacheEvent::Removed {
      prefix: prefix.clone(),
    });
    Ok(count)
  }

  /// Drop everything.
  pub fn clear(&self) -> Result<()> {
    self.storage.clear()?;
    self.emit(CacheEvent::Removed {
      prefix: QueryKey::from_segments(Vec::new()),
    });
    Ok(())
  }

  fn emit(&self, event: CacheEvent) {
    // No subscribers is fine
    let _ = self.state.events.send(event);
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("stale_time", &self.stale_time)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::error::Error;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;

  fn client() -> QueryClient {
    QueryClient::new(MemoryStorage::new()).with_retry(RetryPolicy::none())
  }

  fn counting_fetcher(
    calls: Arc<AtomicU32>,
    value: i64,
  ) -> impl Fn() -> BoxFuture<'static, Result<i64>> + Send + Sync + 'static {
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(value)
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_fresh_entry_skips_network() {
    let client = client().with_stale_time(std::time::Duration::from_secs(300));
    let key = QueryKey::collection("buses").with(1);
    let calls = Arc::new(AtomicU32::new(0));

    let first: i64 = client
      .fetch_query(&key, EntryKind::Item, counting_fetcher(calls.clone(), 5))
      .await
      .unwrap();
    let second: i64 = client
      .fetch_query(&key, EntryKind::Item, counting_fetcher(calls.clone(), 6))
      .await
      .unwrap();

    assert_eq!(first, 5);
    assert_eq!(second, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_stale_entry_refetches() {
    let client = client();
    let key = QueryKey::collection("buses").with(1);
    let calls = Arc::new(AtomicU32::new(0));

    let _: i64 = client
      .fetch_query(&key, EntryKind::Item, counting_fetcher(calls.clone(), 5))
      .await
      .unwrap();
    let second: i64 = client
      .fetch_query(&key, EntryKind::Item, counting_fetcher(calls.clone(), 6))
      .await
      .unwrap();

    assert_eq!(second, 6);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_are_coalesced() {
    let client = client();
    let key = QueryKey::collection("routes");
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
      client.fetch_query::<i64, _, _>(&key, EntryKind::List, counting_fetcher(calls.clone(), 1)),
      client.fetch_query::<i64, _, _>(&key, EntryKind::List, counting_fetcher(calls.clone(), 2)),
    );

    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_retries_transient_errors() {
    let client = client().with_retry(RetryPolicy {
      retries: 3,
      base_delay: std::time::Duration::ZERO,
      max_delay: std::time::Duration::ZERO,
    });
    let key = QueryKey::collection("drivers").with(2);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<i64> = client
      .fetch_query(&key, EntryKind::Item, move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
          if attempt < 2 {
            Err(Error::Transport("connection reset".to_string()))
          } else {
            Ok(42)
          }
        }
      })
      .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_not_found_is_not_retried() {
    let client = client().with_retry(RetryPolicy {
      retries: 3,
      base_delay: std::time::Duration::ZERO,
      max_delay: std::time::Duration::ZERO,
    });
    let key = QueryKey::collection("drivers").with(99);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<i64> = client
      .fetch_query(&key, EntryKind::Item, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(Error::not_found("driver", 99)) }
      })
      .await;

    assert!(result.unwrap_err().is_not_found());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(client.get_entry(&key).unwrap().is_none());
  }

  #[test]
  fn test_retry_delay_backoff() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(0), std::time::Duration::from_secs(1));
    assert_eq!(policy.delay(1), std::time::Duration::from_secs(2));
    assert_eq!(policy.delay(4), std::time::Duration::from_secs(16));
    assert_eq!(policy.delay(5), std::time::Duration::from_secs(30));
    assert_eq!(policy.delay(40), std::time::Duration::from_secs(30));
  }

  #[tokio::test]
  async fn test_invalidate_emits_event_with_count() {
    let client = client().with_stale_time(std::time::Duration::from_secs(300));
    let mut events = client.subscribe();
    client
      .set_query_data(&QueryKey::collection("buses"), EntryKind::List, &json!([]))
      .unwrap();
    client
      .set_query_data(&QueryKey::collection("buses").with(3), EntryKind::Item, &json!({"id": 3}))
      .unwrap();
    client
      .set_query_data(&QueryKey::collection("routes"), EntryKind::List, &json!([]))
      .unwrap();

    let count = client
      .invalidate_queries(&QueryKey::collection("buses"))
      .unwrap();
    assert_eq!(count, 2);
    assert!(!client.is_fresh(&QueryKey::collection("buses")));
    assert!(client.is_fresh(&QueryKey::collection("routes")));

    let mut invalidations = Vec::new();
    while let Ok(event) = events.try_recv() {
      if let CacheEvent::Invalidated { prefix, count } = event {
        invalidations.push((prefix, count));
      }
    }
    assert_eq!(invalidations, vec![(QueryKey::collection("buses"), 2)]);
  }

  /// Fetcher that answers `value` once the returned sender fires.
  fn gated_fetcher<T>(
    value: T,
  ) -> (
    tokio::sync::oneshot::Sender<()>,
    impl Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
  )
  where
    T: Clone + Send + Sync + 'static,
  {
    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let gate = Arc::new(tokio::sync::Mutex::new(Some(gate)));
    let fetcher = move || {
      let gate = gate.clone();
      let value = value.clone();
      async move {
        if let Some(gate) = gate.lock().await.take() {
          let _ = gate.await;
        }
        Ok(value)
      }
      .boxed()
    };
    (release, fetcher)
  }

  fn spawn_list_fetch<T, F>(client: &QueryClient, key: &QueryKey, fetcher: F) -> tokio::task::JoinHandle<Result<T>>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
  {
    let client = client.clone();
    let key = key.clone();
    tokio::spawn(async move { client.fetch_query(&key, EntryKind::List, fetcher).await })
  }

  #[tokio::test]
  async fn test_invalidation_during_fetch_stores_stale_result() {
    let client = client().with_stale_time(std::time::Duration::from_secs(300));
    let key = QueryKey::collection("terminals");
    let (release, fetcher) = gated_fetcher(vec![1i64, 2]);
    let handle = spawn_list_fetch(&client, &key, fetcher);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    client.invalidate_queries(&key).unwrap();
    release.send(()).unwrap();

    assert_eq!(handle.await.unwrap().unwrap(), vec![1, 2]);
    let entry = client.get_entry(&key).unwrap().unwrap();
    assert!(entry.invalidated);
  }

  #[tokio::test]
  async fn test_invalidating_another_collection_leaves_fetch_fresh() {
    let client = client().with_stale_time(std::time::Duration::from_secs(300));
    let buses = QueryKey::collection("buses");
    let (release, fetcher) = gated_fetcher(vec![1i64]);
    let handle = spawn_list_fetch(&client, &buses, fetcher);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    client
      .invalidate_queries(&QueryKey::collection("routes"))
      .unwrap();
    release.send(()).unwrap();

    assert_eq!(handle.await.unwrap().unwrap(), vec![1]);
    assert!(!client.get_entry(&buses).unwrap().unwrap().invalidated);
    assert!(client.is_fresh(&buses));
  }

  #[tokio::test]
  async fn test_detached_fetch_keeps_newer_data() {
    let client = client().with_stale_time(std::time::Duration::from_secs(300));
    let key = QueryKey::collection("buses");
    let (release, fetcher) = gated_fetcher(vec!["pre-mutation".to_string()]);
    let before = spawn_list_fetch(&client, &key, fetcher);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    client.invalidate_queries(&key).unwrap();
    let after: Vec<String> = client
      .fetch_query(&key, EntryKind::List, || async {
        Ok(vec!["post-mutation".to_string()])
      })
      .await
      .unwrap();
    assert_eq!(after, vec!["post-mutation".to_string()]);

    release.send(()).unwrap();
    assert_eq!(before.await.unwrap().unwrap(), vec!["pre-mutation".to_string()]);

    let entry = client.get_entry(&key).unwrap().unwrap();
    assert_eq!(entry.data, json!(["post-mutation"]));
    assert!(!entry.invalidated);
    assert!(client.is_fresh(&key));
  }

  #[test]
  fn test_find_in_collection_prefers_full_list() {
    let client = client();
    let prefix = QueryKey::collection("busModels");
    client
      .set_query_data(
        &prefix.clone().with(json!({"page": 1})),
        EntryKind::Page,
        &json!({"items": [{"id": 4, "name": "from page"}], "page": 1, "pageSize": 20, "total": 1}),
      )
      .unwrap();
    client
      .set_query_data(&prefix, EntryKind::List, &json!([{"id": 4, "name": "from list"}]))
      .unwrap();

    let found: Option<Value> = client
      .find_in_collection(&prefix, |record: &Value| record["id"] == 4)
      .unwrap();
    assert_eq!(found.unwrap()["name"], "from list");

    let missing: Option<Value> = client
      .find_in_collection(&prefix, |record: &Value| record["id"] == 5)
      .unwrap();
    assert!(missing.is_none());
  }

  #[test]
  fn test_find_in_collection_reads_pages() {
    let client = client();
    let prefix = QueryKey::collection("buses");
    client
      .set_query_data(
        &prefix.clone().with(json!({"page": 2})),
        EntryKind::Page,
        &json!({"items": [{"id": 21}], "page": 2, "pageSize": 20, "total": 21}),
      )
      .unwrap();
    client
      .set_query_data(&prefix.clone().with(21), EntryKind::Item, &json!({"id": 21, "item": true}))
      .unwrap();

    let found: Option<Value> = client
      .find_in_collection(&prefix, |record: &Value| record["id"] == 21)
      .unwrap();
    assert_eq!(found.unwrap(), json!({"id": 21}));
  }
}
