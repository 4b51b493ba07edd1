//! Write operations that invalidate the cache on success.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::QueryKey;
use crate::collection::HookContext;
use crate::error::Result;
use crate::toast::ToastKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
  Create,
  Update,
  Delete,
}

impl MutationAction {
  /// Message-catalog key for this action
  pub fn as_str(&self) -> &'static str {
    match self {
      MutationAction::Create => "create",
      MutationAction::Update => "update",
      MutationAction::Delete => "delete",
    }
  }
}

type MutationFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O>> + Send + Sync>;

/// A remote write bound to a collection.
///
/// Every call toasts `loading`, runs the remote call, then either invalidates
/// all queries under the collection prefix and toasts `success`, or toasts
/// `error` and leaves the cache alone. Cached data is never edited in place.
pub struct Mutation<I, O> {
  action: MutationAction,
  namespace: String,
  invalidates: QueryKey,
  ctx: HookContext,
  mutation_fn: MutationFn<I, O>,
}

impl<I, O> Mutation<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub fn new<F, Fut>(
    ctx: &HookContext,
    action: MutationAction,
    namespace: impl Into<String>,
    invalidates: QueryKey,
    mutation_fn: F,
  ) -> Self
  where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
  {
    Self {
      action,
      namespace: namespace.into(),
      invalidates,
      ctx: ctx.clone(),
      mutation_fn: Arc::new(move |input| mutation_fn(input).boxed()),
    }
  }

  pub fn action(&self) -> MutationAction {
    self.action
  }

  /// Prefix invalidated after a successful call
  pub fn invalidates(&self) -> &QueryKey {
    &self.invalidates
  }

  pub async fn mutate(&self, input: I) -> Result<O> {
    self.toast(ToastKind::Loading, None);

    match (self.mutation_fn)(input).await {
      Ok(output) => {
        info!(
          namespace = %self.namespace,
          action = self.action.as_str(),
          "mutation succeeded"
        );
        // The write already happened; a cache failure only costs freshness
        if let Err(err) = self.ctx.client.invalidate_queries(&self.invalidates) {
          warn!(prefix = %self.invalidates, error = %err, "failed to invalidate queries");
        }
        self.toast(ToastKind::Success, None);
        Ok(output)
      }
      Err(err) => {
        warn!(
          namespace = %self.namespace,
          action = self.action.as_str(),
          error = %err,
          "mutation failed"
        );
        self.toast(ToastKind::Error, Some(&err.to_string()));
        Err(err)
      }
    }
  }

  fn toast(&self, kind: ToastKind, error: Option<&str>) {
    let message = self
      .ctx
      .messages
      .mutation(&self.namespace, self.action.as_str(), kind, error);
    self.ctx.toaster.toast(kind, &message);
  }
}

impl<I, O> std::fmt::Debug for Mutation<I, O> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("action", &self.action)
      .field("namespace", &self.namespace)
      .field("invalidates", &self.invalidates)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEvent, EntryKind, MemoryStorage, QueryClient};
  use crate::error::Error;
  use crate::messages::Messages;
  use crate::toast::testing::RecordingToaster;
  use serde_json::json;
  use std::time::Duration;

  fn context() -> (HookContext, Arc<RecordingToaster>) {
    let toaster = Arc::new(RecordingToaster::default());
    let client = QueryClient::new(MemoryStorage::new()).with_stale_time(Duration::from_secs(300));
    let ctx = HookContext::new(client, toaster.clone(), Arc::new(Messages::default()));
    (ctx, toaster)
  }

  #[tokio::test]
  async fn test_success_invalidates_prefix() {
    let (ctx, toaster) = context();
    let routes = QueryKey::collection("routes");
    ctx
      .client
      .set_query_data(&routes, EntryKind::List, &json!([]))
      .unwrap();
    ctx
      .client
      .set_query_data(&QueryKey::collection("drivers"), EntryKind::List, &json!([]))
      .unwrap();

    let mutation = Mutation::new(
      &ctx,
      MutationAction::Delete,
      "routes",
      routes.clone(),
      |id: i64| async move { Ok(id) },
    );
    assert_eq!(mutation.mutate(3).await.unwrap(), 3);

    assert!(!ctx.client.is_fresh(&routes));
    assert!(ctx.client.is_fresh(&QueryKey::collection("drivers")));
    assert_eq!(
      toaster.toasts(),
      vec![
        (ToastKind::Loading, "Deleting route...".to_string()),
        (ToastKind::Success, "Deleted route".to_string()),
      ]
    );
  }

  #[tokio::test]
  async fn test_failure_leaves_cache_untouched() {
    let (ctx, toaster) = context();
    let routes = QueryKey::collection("routes");
    ctx
      .client
      .set_query_data(&routes, EntryKind::List, &json!([{"id": 1}]))
      .unwrap();
    let mut events = ctx.client.subscribe();

    let mutation: Mutation<i64, i64> = Mutation::new(
      &ctx,
      MutationAction::Update,
      "routes",
      routes.clone(),
      |_| async { Err(Error::Transport("connection reset".to_string())) },
    );
    let err = mutation.mutate(1).await.unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert!(ctx.client.is_fresh(&routes));
    assert!(events.try_recv().is_err());
    assert_eq!(
      toaster.toasts().last().unwrap(),
      &(
        ToastKind::Error,
        "Could not save route: transport error: connection reset".to_string()
      )
    );
  }

  #[tokio::test]
  async fn test_invalidation_is_announced_once() {
    let (ctx, _) = context();
    let mut events = ctx.client.subscribe();
    let mutation = Mutation::new(
      &ctx,
      MutationAction::Create,
      "users",
      QueryKey::collection("users"),
      |name: String| async move { Ok(name) },
    );
    mutation.mutate("ana".to_string()).await.unwrap();

    let mut invalidations = 0;
    while let Ok(event) = events.try_recv() {
      if let CacheEvent::Invalidated { prefix, .. } = event {
        assert_eq!(prefix, QueryKey::collection("users"));
        invalidations += 1;
      }
    }
    assert_eq!(invalidations, 1);
  }
}
