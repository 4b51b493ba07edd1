//! Cached values and the events emitted when they change.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::key::QueryKey;
use crate::error::{Error, Result};

/// Shape of the cached value, so collection lookups know how to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  /// A single record
  Item,
  /// A full, unpaginated collection (`[T]`)
  List,
  /// One page of a collection (`Page<T>`)
  Page,
}

impl EntryKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntryKind::Item => "item",
      EntryKind::List => "list",
      EntryKind::Page => "page",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "item" => Some(EntryKind::Item),
      "list" => Some(EntryKind::List),
      "page" => Some(EntryKind::Page),
      _ => None,
    }
  }
}

/// A cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub kind: EntryKind,
  pub data: Value,
  /// When the value was fetched
  pub cached_at: DateTime<Utc>,
  /// Set by invalidation; the value stays readable but is refetched on next use
  pub invalidated: bool,
}

impl CacheEntry {
  pub fn new(kind: EntryKind, data: Value) -> Self {
    Self {
      kind,
      data,
      cached_at: Utc::now(),
      invalidated: false,
    }
  }

  pub fn is_stale(&self, stale_time: Duration) -> bool {
    self.invalidated || Utc::now() - self.cached_at >= stale_time
  }

  pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_value(self.data.clone()).map_err(|e| Error::Decode(e.to_string()))
  }
}

/// Broadcast by the query client so observers can refetch.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
  /// A fresh value was stored under this key
  Updated { key: QueryKey },
  /// Entries under this prefix were flagged stale
  Invalidated { prefix: QueryKey, count: usize },
  /// Entries under this prefix were dropped
  Removed { prefix: QueryKey },
}
