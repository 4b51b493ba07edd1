//! Generic query and mutation hooks for one entity collection.
//!
//! Every collection gets the same three factories, parameterised by its
//! cache-key prefix and remote calls:
//!
//! - [`collection_item_query`]: one record by id, seeded from cached lists
//! - [`collection_list_query`]: one server-side page for some list params
//! - [`collection_mutations`]: create/update/delete that invalidate the prefix
//!
//! [`Collection`] wires all three to the REST client for an [`Entity`] type.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{ApiClient, DeleteAck, ListParams, Page};
use crate::cache::{EntryKind, QueryClient, QueryKey};
use crate::entity::{is_persisted, require_persisted, DomainEntity, Entity, EntityId};
use crate::error::{Error, Result};
use crate::messages::Messages;
use crate::mutation::{Mutation, MutationAction};
use crate::query::{Query, QueryOptions};
use crate::toast::Toaster;

/// What every hook needs: the cache, where toasts go, and their wording.
#[derive(Clone)]
pub struct HookContext {
  pub client: QueryClient,
  pub toaster: Arc<dyn Toaster>,
  pub messages: Arc<Messages>,
}

impl HookContext {
  pub fn new(client: QueryClient, toaster: Arc<dyn Toaster>, messages: Arc<Messages>) -> Self {
    Self {
      client,
      toaster,
      messages,
    }
  }
}

type ItemFetchFn<T> = Arc<dyn Fn(EntityId) -> BoxFuture<'static, Result<T>> + Send + Sync>;
type PageFetchFn<T> = Arc<dyn Fn(ListParams) -> BoxFuture<'static, Result<Page<T>>> + Send + Sync>;

/// Build the single-record query hook for a collection.
pub fn collection_item_query<T, F, Fut>(client: &QueryClient, prefix: &str, fetch: F) -> ItemQueryHook<T>
where
  T: Entity,
  F: Fn(EntityId) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T>> + Send + 'static,
{
  ItemQueryHook {
    client: client.clone(),
    prefix: QueryKey::collection(prefix),
    fetch: Arc::new(move |id| fetch(id).boxed()),
  }
}

pub struct ItemQueryHook<T> {
  client: QueryClient,
  prefix: QueryKey,
  fetch: ItemFetchFn<T>,
}

impl<T: Entity> ItemQueryHook<T> {
  /// `[prefix, id]`
  pub fn key(&self, id: Option<EntityId>) -> QueryKey {
    self.prefix.clone().with(id)
  }

  /// Observe the record with this id.
  ///
  /// A record found in a cached list or page under the prefix is shown right
  /// away while the fetch refreshes it. The fetch only runs when `options`
  /// enable it and `id` is persisted.
  pub fn call(&self, id: Option<EntityId>, options: QueryOptions) -> Query<T> {
    let enabled = options.enabled && is_persisted(id);
    let fetch = self.fetch.clone();
    let fetcher = move || match id {
      Some(id) => fetch(id),
      None => async { Err(Error::validation(format!("{} id is required", T::label()))) }.boxed(),
    };

    let mut query = Query::new(self.client.clone(), self.key(id), EntryKind::Item, fetcher).enabled(enabled);
    if query.data().is_none() && is_persisted(id) {
      if let Some(seed) = self.seed(id) {
        debug!(collection = %self.prefix, ?id, "seeding item query from cached collection");
        query = query.initial_data(seed);
      }
    }
    query.fetch();
    query
  }

  /// Resolve the record, going through the cache.
  pub async fn fetch(&self, id: EntityId) -> Result<T> {
    let mut query = self.call(Some(id), QueryOptions::default());
    if !query.is_enabled() {
      return Err(Error::validation(format!("invalid {} id: {}", T::label(), id)));
    }
    query.settle().await;
    settled(query)
  }

  fn seed(&self, id: Option<EntityId>) -> Option<T> {
    self
      .client
      .find_in_collection(&self.prefix, |record: &T| record.id() == id)
      .unwrap_or_else(|err| {
        warn!(collection = %self.prefix, error = %err, "failed to read cached collection");
        None
      })
  }
}

/// Build the paginated list query hook for a collection.
///
/// Params go to the server as-is; nothing is sorted or filtered locally.
pub fn collection_list_query<T, F, Fut>(client: &QueryClient, prefix: &str, fetch: F) -> ListQueryHook<T>
where
  T: Entity,
  F: Fn(ListParams) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Page<T>>> + Send + 'static,
{
  ListQueryHook {
    client: client.clone(),
    prefix: QueryKey::collection(prefix),
    fetch: Arc::new(move |params| fetch(params).boxed()),
  }
}

pub struct ListQueryHook<T> {
  client: QueryClient,
  prefix: QueryKey,
  fetch: PageFetchFn<T>,
}

impl<T: Entity> ListQueryHook<T> {
  /// `[prefix, params]`
  pub fn key(&self, params: &ListParams) -> QueryKey {
    self.prefix.clone().with(params)
  }

  pub fn call(&self, params: ListParams, options: QueryOptions) -> Query<Page<T>> {
    let key = self.key(&params);
    let fetch = self.fetch.clone();
    let mut query = Query::new(self.client.clone(), key, EntryKind::Page, move || fetch(params.clone()))
      .enabled(options.enabled);
    query.fetch();
    query
  }

  pub async fn fetch(&self, params: ListParams) -> Result<Page<T>> {
    let mut query = self.call(params, QueryOptions::default());
    query.settle().await;
    settled(query)
  }
}

/// The three write hooks of a collection.
pub struct MutationHooks<T> {
  pub create: Mutation<T, T>,
  pub update: Mutation<T, T>,
  pub delete: Mutation<EntityId, DeleteAck>,
}

/// Build create/update/delete hooks that invalidate everything under `prefix`.
///
/// `update` rejects transient records before the remote call is made and
/// hands the checked id to `update` along with the record.
pub fn collection_mutations<T, C, CF, U, UF, D, DF>(
  ctx: &HookContext,
  prefix: &str,
  namespace: &str,
  create: C,
  update: U,
  delete: D,
) -> MutationHooks<T>
where
  T: Entity,
  C: Fn(T) -> CF + Send + Sync + 'static,
  CF: Future<Output = Result<T>> + Send + 'static,
  U: Fn(EntityId, T) -> UF + Send + Sync + 'static,
  UF: Future<Output = Result<T>> + Send + 'static,
  D: Fn(EntityId) -> DF + Send + Sync + 'static,
  DF: Future<Output = Result<DeleteAck>> + Send + 'static,
{
  let prefix = QueryKey::collection(prefix);
  let update = Arc::new(update);

  MutationHooks {
    create: Mutation::new(ctx, MutationAction::Create, namespace, prefix.clone(), create),
    update: Mutation::new(
      ctx,
      MutationAction::Update,
      namespace,
      prefix.clone(),
      move |record: T| {
        let update = update.clone();
        async move {
          let id = require_persisted(&record, "update")?;
          update(id, record).await
        }
      },
    ),
    delete: Mutation::new(ctx, MutationAction::Delete, namespace, prefix, delete),
  }
}

/// Hooks for one entity type, backed by the REST client.
pub struct Collection<T: Entity> {
  ctx: HookContext,
  api: ApiClient,
  pub item: ItemQueryHook<T>,
  pub pages: ListQueryHook<T>,
  pub mutations: Arc<MutationHooks<T>>,
}

impl<T: Entity> Collection<T> {
  pub fn new(ctx: &HookContext, api: &ApiClient) -> Self {
    let item = {
      let api = api.clone();
      collection_item_query(&ctx.client, T::collection(), move |id| {
        let api = api.clone();
        async move { api.get::<T>(id).await }
      })
    };

    let pages = {
      let api = api.clone();
      collection_list_query(&ctx.client, T::collection(), move |params: ListParams| {
        let api = api.clone();
        async move { api.list_paginated::<T>(&params).await }
      })
    };

    let (create_api, update_api, delete_api) = (api.clone(), api.clone(), api.clone());
    let mutations = collection_mutations(
      ctx,
      T::collection(),
      T::namespace(),
      move |record: T| {
        let api = create_api.clone();
        async move { api.create(&record).await }
      },
      move |id, record: T| {
        let api = update_api.clone();
        async move { api.update(id, &record).await }
      },
      move |id| {
        let api = delete_api.clone();
        async move { api.delete::<T>(id).await }
      },
    );

    Self {
      ctx: ctx.clone(),
      api: api.clone(),
      item,
      pages,
      mutations: Arc::new(mutations),
    }
  }

  /// `[prefix]`
  pub fn prefix(&self) -> QueryKey {
    QueryKey::collection(T::collection())
  }

  /// Observe the whole collection (unpaginated).
  pub fn all(&self, options: QueryOptions) -> Query<Vec<T>> {
    let api = self.api.clone();
    let mut query = Query::new(self.ctx.client.clone(), self.prefix(), EntryKind::List, move || {
      let api = api.clone();
      async move { api.list::<T>().await }
    })
    .enabled(options.enabled);
    query.fetch();
    query
  }

  pub async fn fetch_all(&self) -> Result<Vec<T>> {
    let mut query = self.all(QueryOptions::default());
    query.settle().await;
    settled(query)
  }

  /// Bind a record to this collection's mutations.
  pub fn entity(&self, record: T) -> DomainEntity<T> {
    DomainEntity::new(record, self.mutations.clone())
  }
}

/// Data of a settled query, or its error.
fn settled<T>(query: Query<T>) -> Result<T>
where
  T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
  if let (true, Some(err)) = (query.is_error(), query.error()) {
    return Err(err.clone());
  }
  query
    .into_data()
    .ok_or_else(|| Error::Transport("query finished without data".to_string()))
}
