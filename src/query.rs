//! Observable query state for data fetching through the query client.
//!
//! Inspired by TanStack Query, a `Query<T>` encapsulates one cache key, the
//! fetch that fills it, and the pending/success/error state a view renders.
//!
//! # Example
//!
//! ```ignore
//! let mut query = buses.pages.call(ListParams::default(), QueryOptions::default());
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.status() {
//!     QueryStatus::Pending => render_spinner(),
//!     QueryStatus::Success => render_page(query.data().unwrap()),
//!     QueryStatus::Error => render_error(query.error().unwrap()),
//! }
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::cache::{CacheEvent, EntryKind, QueryClient, QueryKey};
use crate::error::{Error, Result};

/// The state of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// No data yet (fetching, or disabled)
  Pending,
  /// The last fetch failed; earlier data may still be available
  Error,
  /// Data is available
  Success,
}

/// Per-call options for query hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  /// A disabled query never fetches; it only shows what is already cached.
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self { enabled: true }
  }
}

impl QueryOptions {
  pub fn enabled(enabled: bool) -> Self {
    Self { enabled }
  }
}

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Async query with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure), routed through the query client
/// - Pending/success/error states
/// - Async result handling via channels
/// - Refetching when its key is invalidated
pub struct Query<T> {
  key: QueryKey,
  kind: EntryKind,
  client: QueryClient,
  status: QueryStatus,
  data: Option<T>,
  error: Option<Error>,
  fetcher: FetcherFn<T>,
  receiver: Option<oneshot::Receiver<Result<T>>>,
  events: broadcast::Receiver<CacheEvent>,
  enabled: bool,
  fetched_at: Option<Instant>,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Send + 'static,
{
  /// Create a query for `key`. Nothing is fetched until `fetch()` is called.
  ///
  /// Whatever the cache already holds for the key (fresh or stale) becomes the
  /// initial data.
  pub fn new<F, Fut>(client: QueryClient, key: QueryKey, kind: EntryKind, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let cached = client.get_query_data::<T>(&key).unwrap_or_else(|err| {
      warn!(key = %key, error = %err, "ignoring unreadable cache entry");
      None
    });
    let events = client.subscribe();

    Self {
      status: if cached.is_some() {
        QueryStatus::Success
      } else {
        QueryStatus::Pending
      },
      data: cached,
      error: None,
      fetcher: Arc::new(move || fetcher().boxed()),
      receiver: None,
      events,
      enabled: true,
      fetched_at: None,
      key,
      kind,
      client,
    }
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  /// Seed the query with data found elsewhere (e.g. in a cached list).
  pub fn initial_data(mut self, data: T) -> Self {
    self.data = Some(data);
    self.status = QueryStatus::Success;
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn into_data(self) -> Option<T> {
    self.data
  }

  pub fn error(&self) -> Option<&Error> {
    self.error.as_ref()
  }

  pub fn is_pending(&self) -> bool {
    self.status == QueryStatus::Pending
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// A fetch has been issued and its result not yet observed.
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Whether the cached value behind this query would be refetched.
  pub fn is_stale(&self) -> bool {
    !self.client.is_fresh(&self.key)
  }

  /// When this query last received a result.
  pub fn fetched_at(&self) -> Option<Instant> {
    self.fetched_at
  }

  /// Start fetching if enabled and not already fetching.
  pub fn fetch(&mut self) {
    if !self.enabled || self.is_fetching() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, dropping any pending result.
  pub fn refetch(&mut self) {
    if !self.enabled {
      return;
    }
    self.receiver = None;
    self.start_fetch();
  }

  /// Enable or disable the query. Enabling a query without data fetches it.
  pub fn set_enabled(&mut self, enabled: bool) {
    self.enabled = enabled;
    if enabled && self.data.is_none() {
      self.fetch();
    }
  }

  /// Poll for invalidations and results.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    if self.take_invalidation() && self.enabled {
      debug!(key = %self.key, "query invalidated, refetching");
      self.refetch();
      changed = true;
    }

    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return changed,
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        self.apply(result);
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => changed,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.receiver = None;
        self.apply(Err(Error::Transport("query was cancelled".to_string())));
        true
      }
    }
  }

  /// Wait until the pending fetch (if any) has resolved.
  pub async fn settle(&mut self) {
    self.poll();
    if let Some(receiver) = self.receiver.take() {
      let result = receiver
        .await
        .unwrap_or_else(|_| Err(Error::Transport("query was cancelled".to_string())));
      self.apply(result);
    }
  }

  /// Drain cache events; true if one of them invalidated this key.
  fn take_invalidation(&mut self) -> bool {
    let mut invalidated = false;
    loop {
      match self.events.try_recv() {
        Ok(CacheEvent::Invalidated { prefix, .. }) => {
          invalidated |= self.key.starts_with(&prefix);
        }
        Ok(_) => {}
        // Missed events might have been invalidations
        Err(broadcast::error::TryRecvError::Lagged(_)) => invalidated = true,
        Err(_) => break,
      }
    }
    invalidated
  }

  fn apply(&mut self, result: Result<T>) {
    match result {
      Ok(data) => {
        self.data = Some(data);
        self.error = None;
        self.status = QueryStatus::Success;
        self.fetched_at = Some(Instant::now());
      }
      Err(error) => {
        debug!(key = %self.key, error = %error, "query failed");
        self.error = Some(error);
        self.status = QueryStatus::Error;
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = oneshot::channel();
    self.receiver = Some(rx);

    let client = self.client.clone();
    let key = self.key.clone();
    let kind = self.kind;
    let fetcher = self.fetcher.clone();

    tokio::spawn(async move {
      let result = client.fetch_query(&key, kind, move || fetcher()).await;
      // Ignore send errors - the query may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("status", &self.status)
      .field("data", &self.data)
      .field("error", &self.error)
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}
