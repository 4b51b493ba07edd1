//! Request parameters and response envelopes shared by every collection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::entity::EntityId;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
  #[default]
  Asc,
  Desc,
}

impl fmt::Display for SortDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SortDirection::Asc => f.write_str("asc"),
      SortDirection::Desc => f.write_str("desc"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
  pub field: String,
  pub direction: SortDirection,
}

/// Filter, sort and pagination parameters for a paginated list.
///
/// These are passed through to the server untouched and also become a
/// segment of the query key, so each combination is cached separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
  /// 1-based page number
  pub page: u32,
  pub page_size: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sort: Option<Sort>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub filters: BTreeMap<String, String>,
}

impl Default for ListParams {
  fn default() -> Self {
    Self {
      page: 1,
      page_size: DEFAULT_PAGE_SIZE,
      sort: None,
      filters: BTreeMap::new(),
    }
  }
}

impl ListParams {
  pub fn page(mut self, page: u32) -> Self {
    self.page = page.max(1);
    self
  }

  pub fn page_size(mut self, page_size: u32) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
    self.sort = Some(Sort {
      field: field.into(),
      direction,
    });
    self
  }

  pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
    self.filters.insert(field.into(), value.into());
    self
  }

  /// Query-string pairs for the paginated endpoint.
  pub fn query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = vec![
      ("page".to_string(), self.page.to_string()),
      ("pageSize".to_string(), self.page_size.to_string()),
    ];
    if let Some(sort) = &self.sort {
      pairs.push(("sort".to_string(), sort.field.clone()));
      pairs.push(("order".to_string(), sort.direction.to_string()));
    }
    pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
    pairs
  }
}

/// Query-key segment for these params. Built by hand so every combination
/// maps to a distinct object.
impl From<&ListParams> for Value {
  fn from(params: &ListParams) -> Self {
    let mut segment = Map::new();
    segment.insert("page".to_string(), params.page.into());
    segment.insert("pageSize".to_string(), params.page_size.into());
    if let Some(sort) = &params.sort {
      segment.insert("sort".to_string(), sort.field.clone().into());
      segment.insert("order".to_string(), sort.direction.to_string().into());
    }
    if !params.filters.is_empty() {
      let filters: Map<String, Value> = params
        .filters
        .iter()
        .map(|(field, value)| (field.clone(), Value::from(value.clone())))
        .collect();
      segment.insert("filters".to_string(), Value::Object(filters));
    }
    Value::Object(segment)
  }
}

/// One page of a collection plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: u32,
  pub page_size: u32,
  /// Total records across all pages
  pub total: u64,
}

impl<T> Page<T> {
  pub fn total_pages(&self) -> u64 {
    if self.page_size == 0 {
      return 0;
    }
    self.total.div_ceil(u64::from(self.page_size))
  }

  pub fn has_next_page(&self) -> bool {
    u64::from(self.page) < self.total_pages()
  }

  pub fn has_previous_page(&self) -> bool {
    self.page > 1
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// Acknowledgement of a (soft) delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAck {
  pub id: EntityId,
}

/// Error body returned by the API on non-success statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub code: Option<String>,
  pub message: Option<String>,
  pub error: Option<String>,
}
