//! Query keys: ordered segments, matched by prefix.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Ordered cache key. The first segment names the collection; the rest scope
/// the query (ids, filter objects, page parameters).
///
/// Object segments compare structurally, so two filter maps with the same
/// entries in a different insertion order produce the same key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
  /// Key for a whole collection, also used as its invalidation prefix.
  pub fn collection(name: &str) -> Self {
    Self(vec![Value::String(name.to_string())])
  }

  pub fn from_segments(segments: Vec<Value>) -> Self {
    Self(segments)
  }

  /// Append a scoping segment. `None` becomes `null`, which is how an item
  /// key without an id is spelled.
  pub fn with(mut self, segment: impl Into<Value>) -> Self {
    self.0.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[Value] {
    &self.0
  }

  /// Name of the collection this key belongs to.
  pub fn collection_name(&self) -> Option<&str> {
    self.0.first().and_then(Value::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Segment-wise prefix match. The empty key is a prefix of every key.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    prefix.0.len() <= self.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
  }

  /// Canonical JSON text of the key.
  pub fn canonical(&self) -> String {
    // serde_json keeps object keys sorted, so this is stable across runs.
    Value::Array(self.0.clone()).to_string()
  }

  /// Fixed-length hash used as the storage primary key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical())
  }
}
