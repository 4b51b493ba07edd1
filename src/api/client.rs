use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::{ApiErrorBody, DeleteAck, ListParams, Page};
use crate::config::ApiConfig;
use crate::entity::{Entity, EntityId};
use crate::error::{Error, Result};

/// Fleet API client
///
/// One generic method per operation; the entity type picks the collection
/// path, so every collection shares the same request code.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let base_url = Url::parse(&config.url)
      .map_err(|e| Error::validation(format!("invalid API url '{}': {}", config.url, e)))?;
    if base_url.cannot_be_a_base() {
      return Err(Error::validation(format!(
        "invalid API url '{}': not a base url",
        config.url
      )));
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("fleetq/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// `{base}/api/{segments...}`
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| Error::validation("API url cannot be a base"))?
      .pop_if_empty()
      .push("api")
      .extend(segments);
    Ok(url)
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// List every record in the collection
  pub async fn list<T: Entity>(&self) -> Result<Vec<T>> {
    let url = self.endpoint(&[T::path()])?;
    self.send(self.http.get(url), None).await
  }

  /// List one page of the collection
  pub async fn list_paginated<T: Entity>(&self, params: &ListParams) -> Result<Page<T>> {
    let url = self.endpoint(&[T::path(), "paginated"])?;
    let request = self.http.get(url).query(&params.query_pairs());
    self.send(request, None).await
  }

  /// Get a single record by id
  pub async fn get<T: Entity>(&self, id: EntityId) -> Result<T> {
    let url = self.endpoint(&[T::path(), &id.to_string()])?;
    self.send(self.http.get(url), Some((T::label(), id))).await
  }

  pub async fn create<T: Entity>(&self, record: &T) -> Result<T> {
    let url = self.endpoint(&[T::path()])?;
    self.send(self.http.post(url).json(record), None).await
  }

  pub async fn update<T: Entity>(&self, id: EntityId, record: &T) -> Result<T> {
    let url = self.endpoint(&[T::path(), &id.to_string()])?;
    self
      .send(self.http.put(url).json(record), Some((T::label(), id)))
      .await
  }

  /// Soft-delete a record. An empty success body counts as an acknowledgement.
  pub async fn delete<T: Entity>(&self, id: EntityId) -> Result<DeleteAck> {
    let url = self.endpoint(&[T::path(), &id.to_string()])?;
    let body = self
      .send_raw(self.http.delete(url), Some((T::label(), id)))
      .await?;
    if body.iter().all(u8::is_ascii_whitespace) {
      return Ok(DeleteAck { id });
    }
    Ok(serde_json::from_slice(&body)?)
  }

  async fn send<R: DeserializeOwned>(
    &self,
    request: RequestBuilder,
    target: Option<(&str, EntityId)>,
  ) -> Result<R> {
    let body = self.send_raw(request, target).await?;
    Ok(serde_json::from_slice(&body)?)
  }

  async fn send_raw(
    &self,
    request: RequestBuilder,
    target: Option<(&str, EntityId)>,
  ) -> Result<Vec<u8>> {
    let request = self.authorize(request).build()?;
    let method = request.method().clone();
    let url = request.url().clone();
    debug!(%method, %url, "sending request");

    let response = self.http.execute(request).await?;
    let status = response.status();
    let body = response.bytes().await?;
    debug!(%method, %url, status = status.as_u16(), "received response");

    if status.is_success() {
      return Ok(body.to_vec());
    }
    Err(error_from_response(status, &body, target))
  }
}

/// Map a non-success response to a typed error.
fn error_from_response(status: StatusCode, body: &[u8], target: Option<(&str, EntityId)>) -> Error {
  let parsed: ApiErrorBody = serde_json::from_slice(body).unwrap_or_default();

  if status == StatusCode::NOT_FOUND || parsed.code.as_deref() == Some("not_found") {
    if let Some((entity, id)) = target {
      return Error::not_found(entity, id);
    }
  }

  let message = parsed
    .message
    .or(parsed.error)
    .or_else(|| {
      let text = String::from_utf8_lossy(body).trim().to_string();
      (!text.is_empty()).then_some(text)
    })
    .unwrap_or_else(|| {
      status
        .canonical_reason()
        .unwrap_or("unknown error")
        .to_string()
    });

  Error::Remote {
    status: status.as_u16(),
    code: parsed.code,
    message,
  }
}

impl std::fmt::Debug for ApiClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApiClient")
      .field("base_url", &self.base_url.as_str())
      .field("authenticated", &self.token.is_some())
      .finish()
  }
}
