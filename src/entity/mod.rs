//! Entity records and their persistence state.
//!
//! A record is persisted exactly when it carries a strictly positive id.
//! Everything that needs a server-side row (updates, deletes, item queries)
//! is gated on [`is_persisted`].

pub mod fleet;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::api::DeleteAck;
use crate::collection::MutationHooks;
use crate::error::{Error, Result};

pub use fleet::{Bus, BusModel, BusStatus, Driver, Population, Route, Terminal, User};

/// Server-assigned identifier.
pub type EntityId = i64;

/// Returns true only for a present, strictly positive identifier.
pub fn is_persisted(id: Option<EntityId>) -> bool {
  matches!(id, Some(id) if id > 0)
}

/// Audit and soft-delete timestamps shared by every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
  /// Set server-side when the record is soft-deleted.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deleted_at: Option<DateTime<Utc>>,
}

/// A record type served by one API collection.
///
/// Implementors describe where the collection lives (cache prefix, API path,
/// translation namespace) and how a record is shown in a table.
pub trait Entity: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Cache-key prefix for the whole collection (e.g. "busModels")
  fn collection() -> &'static str;

  /// Message namespace for toasts
  fn namespace() -> &'static str;

  /// Path segment under `/api/`
  fn path() -> &'static str;

  /// Human-readable singular name (e.g. "bus model")
  fn label() -> &'static str;

  /// Table headers, matching `row()`
  fn columns() -> &'static [&'static str];

  fn id(&self) -> Option<EntityId>;

  fn set_id(&mut self, id: EntityId);

  fn timestamps(&self) -> &Timestamps;

  /// Table cells, matching `columns()`
  fn row(&self) -> Vec<String>;

  fn is_persisted(&self) -> bool {
    is_persisted(self.id())
  }

  fn is_deleted(&self) -> bool {
    self.timestamps().deleted_at.is_some()
  }
}

/// Capability contract for entity wrappers that can write themselves back.
#[allow(async_fn_in_trait)]
pub trait BaseDomainEntity {
  fn id(&self) -> Option<EntityId>;

  fn is_persisted(&self) -> bool {
    is_persisted(self.id())
  }

  /// Create the record when transient, update it otherwise.
  async fn save(&mut self) -> Result<()>;

  /// Update a persisted record. Fails without a network call when transient.
  async fn update(&mut self) -> Result<()>;
}

/// A record bound to its collection's mutations.
///
/// Writes go through the mutation hooks, so they toast and invalidate the
/// collection like any other mutation.
pub struct DomainEntity<T: Entity> {
  record: T,
  mutations: Arc<MutationHooks<T>>,
}

impl<T: Entity> DomainEntity<T> {
  pub fn new(record: T, mutations: Arc<MutationHooks<T>>) -> Self {
    Self { record, mutations }
  }

  pub fn record(&self) -> &T {
    &self.record
  }

  pub fn record_mut(&mut self) -> &mut T {
    &mut self.record
  }

  pub fn into_record(self) -> T {
    self.record
  }

  /// Soft-delete the record on the server.
  pub async fn delete(self) -> Result<DeleteAck> {
    let id = require_persisted(&self.record, "delete")?;
    self.mutations.delete.mutate(id).await
  }
}

/// The record's id, or a validation error naming `action` when it is transient.
pub fn require_persisted<T: Entity>(record: &T, action: &str) -> Result<EntityId> {
  match record.id() {
    Some(id) if id > 0 => Ok(id),
    _ => Err(Error::validation(format!(
      "cannot {} {}: it has not been saved yet",
      action,
      T::label()
    ))),
  }
}

impl<T: Entity> BaseDomainEntity for DomainEntity<T> {
  fn id(&self) -> Option<EntityId> {
    self.record.id()
  }

  async fn save(&mut self) -> Result<()> {
    if self.is_persisted() {
      return self.update().await;
    }
    self.record = self.mutations.create.mutate(self.record.clone()).await?;
    Ok(())
  }

  async fn update(&mut self) -> Result<()> {
    require_persisted(&self.record, "update")?;
    self.record = self.mutations.update.mutate(self.record.clone()).await?;
    Ok(())
  }
}

impl<T: Entity> Debug for DomainEntity<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DomainEntity")
      .field("record", &self.record)
      .finish_non_exhaustive()
  }
}
