use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::cache::{CacheStorage, MemoryStorage, QueryClient, QueryKey, SqliteStorage};
use crate::cli::{CacheCommand, Command, ListArgs, PayloadArgs};
use crate::collection::{Collection, HookContext};
use crate::config::{CacheBackend, CacheConfig, Config};
use crate::entities::{self, EntityKind, ENTITIES};
use crate::entity::{
  is_persisted, BaseDomainEntity, Bus, BusModel, Driver, Entity, EntityId, Population, Route,
  Terminal, User,
};
use crate::error::Error;
use crate::messages::Messages;
use crate::output;
use crate::query::{Query, QueryOptions};
use crate::toast::Toaster;

/// Run `$body` with `$T` bound to the record type of `$kind`.
macro_rules! for_kind {
  ($kind:expr, $T:ident => $body:expr) => {
    match $kind {
      EntityKind::BusModels => {
        type $T = BusModel;
        $body
      }
      EntityKind::Buses => {
        type $T = Bus;
        $body
      }
      EntityKind::Routes => {
        type $T = Route;
        $body
      }
      EntityKind::Drivers => {
        type $T = Driver;
        $body
      }
      EntityKind::Terminals => {
        type $T = Terminal;
        $body
      }
      EntityKind::Populations => {
        type $T = Population;
        $body
      }
      EntityKind::Users => {
        type $T = User;
        $body
      }
    }
  };
}

/// How a command ended, once its output has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Success,
  Failure,
}

impl From<Outcome> for ExitCode {
  fn from(outcome: Outcome) -> Self {
    match outcome {
      Outcome::Success => ExitCode::SUCCESS,
      Outcome::Failure => ExitCode::FAILURE,
    }
  }
}

/// Query client over the configured storage backend.
pub fn query_client(cache: &CacheConfig) -> Result<QueryClient> {
  let storage: Arc<dyn CacheStorage> = match cache.backend {
    CacheBackend::Memory => Arc::new(MemoryStorage::new()),
    CacheBackend::Sqlite => {
      let path = match &cache.path {
        Some(path) => path.clone(),
        None => SqliteStorage::default_path()?,
      };
      debug!(path = %path.display(), "opening cache database");
      Arc::new(SqliteStorage::open(&path)?)
    }
  };

  Ok(
    QueryClient::from_storage(storage)
      .with_stale_time(cache.stale_time())
      .with_retry(cache.retry_policy()),
  )
}

/// Executes one CLI command against the cached API.
pub struct App {
  ctx: HookContext,
  api: ApiClient,
  page_size: u32,
  json: bool,
}

impl App {
  pub fn new(config: &Config, client: QueryClient, toaster: Arc<dyn Toaster>, json: bool) -> Result<Self> {
    let messages = match &config.messages_file {
      Some(path) => Messages::with_overrides(path)?,
      None => Messages::default(),
    };
    let api = ApiClient::new(&config.api, Config::get_api_token())?;

    Ok(Self {
      ctx: HookContext::new(client, toaster, Arc::new(messages)),
      api,
      page_size: config.display.page_size,
      json,
    })
  }

  pub async fn run(&self, command: Command, out: &mut impl Write) -> Result<Outcome> {
    match command {
      Command::Entities => self.entities(out),
      Command::List(args) => {
        let Some(kind) = resolve_entity(&args.entity) else {
          return Ok(Outcome::Failure);
        };
        for_kind!(kind, T => self.list::<T>(&args, out).await)
      }
      Command::Get { entity, id } => {
        let Some(kind) = resolve_entity(&entity) else {
          return Ok(Outcome::Failure);
        };
        for_kind!(kind, T => self.get::<T>(id, out).await)
      }
      Command::Create { entity, payload } => {
        let Some(kind) = resolve_entity(&entity) else {
          return Ok(Outcome::Failure);
        };
        for_kind!(kind, T => self.create::<T>(&payload, out).await)
      }
      Command::Update { entity, id, payload } => {
        let Some(kind) = resolve_entity(&entity) else {
          return Ok(Outcome::Failure);
        };
        for_kind!(kind, T => self.update::<T>(id, &payload, out).await)
      }
      Command::Delete { entity, id } => {
        let Some(kind) = resolve_entity(&entity) else {
          return Ok(Outcome::Failure);
        };
        for_kind!(kind, T => self.delete::<T>(id, out).await)
      }
      Command::Cache(CacheCommand::Invalidate { segments }) => {
        let prefix = cache_prefix(&segments)?;
        let count = self.ctx.client.invalidate_queries(&prefix)?;
        writeln!(out, "invalidated {} cached queries under {}", count, prefix)?;
        Ok(Outcome::Success)
      }
      Command::Cache(CacheCommand::Clear) => {
        self.ctx.client.clear()?;
        writeln!(out, "cache cleared")?;
        Ok(Outcome::Success)
      }
    }
  }

  fn entities(&self, out: &mut impl Write) -> Result<Outcome> {
    if self.json {
      let list: Vec<Value> = ENTITIES
        .iter()
        .map(|e| json!({"name": e.name, "aliases": e.aliases, "description": e.description}))
        .collect();
      output::render_json(out, &list)?;
      return Ok(Outcome::Success);
    }

    let width = ENTITIES.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entity in ENTITIES {
      writeln!(
        out,
        "{:<width$}  {:<24}  {}",
        entity.name,
        entity.aliases.join(", "),
        entity.description,
        width = width
      )?;
    }
    Ok(Outcome::Success)
  }

  async fn list<T: Entity>(&self, args: &ListArgs, out: &mut impl Write) -> Result<Outcome> {
    let collection = Collection::<T>::new(&self.ctx, &self.api);

    if args.all {
      let mut query = collection.all(QueryOptions::default());
      query.settle().await;
      return self.finish::<T, _, _>(query, None, out, |out, records| {
        output::render_table(out, records)
      });
    }

    let mut query = collection
      .pages
      .call(args.params(self.page_size), QueryOptions::default());
    query.settle().await;
    self.finish::<T, _, _>(query, None, out, |out, page| output::render_page(out, page))
  }

  async fn get<T: Entity>(&self, id: EntityId, out: &mut impl Write) -> Result<Outcome> {
    if !is_persisted(Some(id)) {
      eprintln!("invalid {} id: {}", T::label(), id);
      return Ok(Outcome::Failure);
    }

    let collection = Collection::<T>::new(&self.ctx, &self.api);
    let mut query = collection.item.call(Some(id), QueryOptions::default());
    query.settle().await;
    self.finish::<T, _, _>(query, Some(id), out, |out, record| output::render_record(out, record))
  }

  async fn create<T: Entity>(&self, payload: &PayloadArgs, out: &mut impl Write) -> Result<Outcome> {
    let record: T = parse_payload(payload)?;
    if record.is_persisted() {
      eprintln!("a new {} must not carry an id; use update instead", T::label());
      return Ok(Outcome::Failure);
    }

    let mut entity = Collection::<T>::new(&self.ctx, &self.api).entity(record);
    match entity.save().await {
      Ok(()) => self.render_saved(entity.record(), out),
      // the mutation already toasted the failure
      Err(_) => Ok(Outcome::Failure),
    }
  }

  async fn update<T: Entity>(&self, id: EntityId, payload: &PayloadArgs, out: &mut impl Write) -> Result<Outcome> {
    let mut record: T = parse_payload(payload)?;
    record.set_id(id);

    let mut entity = Collection::<T>::new(&self.ctx, &self.api).entity(record);
    match entity.update().await {
      Ok(()) => self.render_saved(entity.record(), out),
      Err(Error::Validation(message)) => {
        eprintln!("{}", message);
        Ok(Outcome::Failure)
      }
      Err(_) => Ok(Outcome::Failure),
    }
  }

  async fn delete<T: Entity>(&self, id: EntityId, out: &mut impl Write) -> Result<Outcome> {
    if !is_persisted(Some(id)) {
      eprintln!("invalid {} id: {}", T::label(), id);
      return Ok(Outcome::Failure);
    }

    let collection = Collection::<T>::new(&self.ctx, &self.api);
    match collection.mutations.delete.mutate(id).await {
      Ok(ack) => {
        if self.json {
          output::render_json(out, &ack)?;
        }
        Ok(Outcome::Success)
      }
      Err(_) => Ok(Outcome::Failure),
    }
  }

  fn render_saved<T: Entity>(&self, record: &T, out: &mut impl Write) -> Result<Outcome> {
    if self.json {
      output::render_json(out, record)?;
    } else {
      output::render_record(out, record)?;
    }
    Ok(Outcome::Success)
  }

  /// Render a settled query.
  ///
  /// A failed refetch over cached data still shows the data, with a warning.
  /// Not-found always wins so a deleted record is never shown from a stale list.
  fn finish<T, D, W>(
    &self,
    query: Query<D>,
    id: Option<EntityId>,
    out: &mut W,
    render: impl FnOnce(&mut W, &D) -> Result<()>,
  ) -> Result<Outcome>
  where
    T: Entity,
    D: Serialize + DeserializeOwned + Send + 'static,
    W: Write,
  {
    let error = if query.is_error() {
      query.error().cloned()
    } else {
      None
    };

    match (error, query.data()) {
      (Some(err), _) if err.is_not_found() => {
        eprintln!("{}", err);
        Ok(Outcome::Failure)
      }
      (Some(err), Some(data)) => {
        warn!(key = %query.key(), error = %err, "showing cached data after failed refresh");
        eprintln!("warning: could not refresh, showing cached data ({})", err);
        self.render_data(data, out, render)?;
        Ok(Outcome::Success)
      }
      (Some(err), None) => {
        eprintln!("{}", describe_error::<T>(&err, id));
        Ok(Outcome::Failure)
      }
      (None, Some(data)) => {
        self.render_data(data, out, render)?;
        Ok(Outcome::Success)
      }
      (None, None) => Err(eyre!("query for {} finished without data", query.key())),
    }
  }

  fn render_data<D: Serialize, W: Write>(
    &self,
    data: &D,
    out: &mut W,
    render: impl FnOnce(&mut W, &D) -> Result<()>,
  ) -> Result<()> {
    if self.json {
      output::render_json(out, data)
    } else {
      render(out, data)
    }
  }
}

/// Message for a load failure with nothing cached to fall back on.
pub fn describe_error<T: Entity>(err: &Error, id: Option<EntityId>) -> String {
  match err {
    Error::NotFound { .. } => err.to_string(),
    Error::Validation(message) => message.clone(),
    _ => {
      let what = match id {
        Some(id) => format!("{} {}", T::label(), id),
        None => T::collection().to_string(),
      };
      format!("Could not load {}: {}\nCheck the API url and your connection, then retry.", what, err)
    }
  }
}

fn resolve_entity(input: &str) -> Option<EntityKind> {
  let kind = entities::resolve(input);
  if kind.is_none() {
    let suggestions: Vec<&str> = entities::get_suggestions(input)
      .iter()
      .take(3)
      .map(|e| e.name)
      .collect();
    if suggestions.is_empty() {
      eprintln!("unknown entity '{}' (see `fleetq entities`)", input);
    } else {
      eprintln!("unknown entity '{}', did you mean: {}", input, suggestions.join(", "));
    }
  }
  kind
}

/// Build an invalidation prefix from CLI segments.
///
/// The first segment may be any entity name or alias; later segments are
/// parsed as JSON when possible (so `4` is a number) and kept as text otherwise.
pub fn cache_prefix(segments: &[String]) -> Result<QueryKey> {
  let (first, rest) = segments
    .split_first()
    .ok_or_else(|| eyre!("At least one key segment is required"))?;

  let collection = match entities::resolve(first) {
    Some(kind) => for_kind!(kind, T => T::collection()).to_string(),
    None => first.clone(),
  };

  let mut key = QueryKey::collection(&collection);
  for segment in rest {
    key = match serde_json::from_str::<Value>(segment) {
      Ok(value) => key.with(value),
      Err(_) => key.with(segment.as_str()),
    };
  }
  Ok(key)
}

fn parse_payload<T: Entity>(payload: &PayloadArgs) -> Result<T> {
  let text = payload.read()?;
  serde_json::from_str(&text).map_err(|e| eyre!("Invalid {} JSON: {}", T::label(), e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{EntryKind, RetryPolicy};
  use crate::toast::testing::RecordingToaster;
  use crate::toast::ToastKind;
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn bus_model_json(id: i64, name: &str) -> Value {
    json!({
      "id": id,
      "name": name,
      "manufacturer": "Volvo",
      "seatCapacity": 40,
      "standingCapacity": 30
    })
  }

  fn app_for(server: &MockServer, json: bool) -> (App, Arc<RecordingToaster>) {
    let toaster = Arc::new(RecordingToaster::default());
    let config = Config::with_url(server.uri());
    let client = QueryClient::new(MemoryStorage::new()).with_retry(RetryPolicy::none());
    let app = App::new(&config, client, toaster.clone(), json).unwrap();
    (app, toaster)
  }

  async fn run(app: &App, args: &[&str]) -> (Outcome, String) {
    use clap::Parser;
    let args =
      crate::cli::Args::try_parse_from(std::iter::once("fleetq").chain(args.iter().copied())).unwrap();
    let mut out = Vec::new();
    let outcome = app.run(args.command, &mut out).await.unwrap();
    (outcome, String::from_utf8(out).unwrap())
  }

  #[tokio::test]
  async fn test_list_renders_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/bus-models/paginated"))
      .and(query_param("page", "1"))
      .and(query_param("pageSize", "20"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "items": [bus_model_json(1, "B9"), bus_model_json(2, "B12")],
        "page": 1,
        "pageSize": 20,
        "total": 2
      })))
      .mount(&server)
      .await;

    let (app, _) = app_for(&server, false);
    let (outcome, text) = run(&app, &["list", "bm"]).await;

    assert_eq!(outcome, Outcome::Success);
    assert!(text.starts_with("ID  NAME"));
    assert!(text.contains("B12"));
    assert!(text.ends_with("page 1 of 1 (2 bus models)\n"));
  }

  #[tokio::test]
  async fn test_get_not_found_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/drivers/9"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let (app, _) = app_for(&server, false);
    let (outcome, text) = run(&app, &["get", "drivers", "9"]).await;
    assert_eq!(outcome, Outcome::Failure);
    assert!(text.is_empty());
  }

  #[tokio::test]
  async fn test_get_invalid_id_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let (app, _) = app_for(&server, false);
    assert_eq!(run(&app, &["get", "drivers", "0"]).await.0, Outcome::Failure);
    assert_eq!(run(&app, &["get", "drivers", "-2"]).await.0, Outcome::Failure);
  }

  #[tokio::test]
  async fn test_get_falls_back_to_cached_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/bus-models/3"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let (app, _) = app_for(&server, true);
    app
      .ctx
      .client
      .set_query_data(
        &QueryKey::collection("busModels"),
        EntryKind::List,
        &json!([bus_model_json(3, "Cached")]),
      )
      .unwrap();

    let (outcome, text) = run(&app, &["get", "bus-models", "3"]).await;
    assert_eq!(outcome, Outcome::Success);
    let shown: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(shown["name"], "Cached");
  }

  #[tokio::test]
  async fn test_unreachable_api_without_cache_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/routes"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let (app, _) = app_for(&server, false);
    let (outcome, _) = run(&app, &["list", "routes", "--all"]).await;
    assert_eq!(outcome, Outcome::Failure);
  }

  #[tokio::test]
  async fn test_create_posts_and_toasts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/bus-models"))
      .respond_with(ResponseTemplate::new(201).set_body_json(bus_model_json(8, "Lion's City")))
      .expect(1)
      .mount(&server)
      .await;

    let (app, toaster) = app_for(&server, true);
    let data = r#"{"name":"Lion's City","manufacturer":"Volvo","seatCapacity":40,"standingCapacity":30}"#;
    let (outcome, text) = run(&app, &["create", "bus-models", "--data", data]).await;

    assert_eq!(outcome, Outcome::Success);
    let created: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(created["id"], 8);
    assert_eq!(
      toaster.toasts(),
      vec![
        (ToastKind::Loading, "Creating bus model...".to_string()),
        (ToastKind::Success, "Created bus model".to_string()),
      ]
    );
  }

  #[tokio::test]
  async fn test_create_rejects_payload_with_id() {
    let server = MockServer::start().await;
    let (app, toaster) = app_for(&server, false);
    let data = bus_model_json(4, "x").to_string();

    let (outcome, _) = run(&app, &["create", "bus-models", "--data", &data]).await;
    assert_eq!(outcome, Outcome::Failure);
    assert!(toaster.toasts().is_empty());
  }

  #[tokio::test]
  async fn test_failed_delete_keeps_cache_fresh() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
      .and(path("/api/buses/5"))
      .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "bus is on a route"})))
      .mount(&server)
      .await;

    let (app, toaster) = app_for(&server, false);
    let ctx = HookContext {
      client: app.ctx.client.clone().with_stale_time(std::time::Duration::from_secs(300)),
      ..app.ctx.clone()
    };
    let app = App { ctx, ..app };
    app
      .ctx
      .client
      .set_query_data(&QueryKey::collection("buses"), EntryKind::List, &json!([]))
      .unwrap();

    let (outcome, _) = run(&app, &["delete", "buses", "5"]).await;
    assert_eq!(outcome, Outcome::Failure);
    assert!(app.ctx.client.is_fresh(&QueryKey::collection("buses")));
    assert_eq!(
      toaster.toasts().last().unwrap(),
      &(
        ToastKind::Error,
        "Could not delete bus: request failed with status 409: bus is on a route".to_string()
      )
    );
  }

  #[tokio::test]
  async fn test_cache_invalidate_by_alias() {
    let server = MockServer::start().await;
    let (app, _) = app_for(&server, false);
    app
      .ctx
      .client
      .set_query_data(&QueryKey::collection("busModels").with(4), EntryKind::Item, &json!({}))
      .unwrap();

    let (outcome, text) = run(&app, &["cache", "invalidate", "bm"]).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(text, "invalidated 1 cached queries under [\"busModels\"]\n");
  }

  #[test]
  fn test_cache_prefix_segments() {
    let key = cache_prefix(&["bus-models".to_string(), "4".to_string()]).unwrap();
    assert_eq!(key, QueryKey::collection("busModels").with(4));

    let key = cache_prefix(&["garages".to_string(), "north".to_string()]).unwrap();
    assert_eq!(key, QueryKey::collection("garages").with("north"));

    assert!(cache_prefix(&[]).is_err());
  }

  #[test]
  fn test_every_kind_maps_to_its_collection() {
    for entity in ENTITIES {
      let collection = for_kind!(entity.kind, T => T::collection());
      assert_eq!(
        cache_prefix(&[entity.name.to_string()]).unwrap(),
        QueryKey::collection(collection)
      );
    }
  }

  #[test]
  fn test_describe_error() {
    let transport = Error::Transport("connection refused".to_string());
    let message = describe_error::<Route>(&transport, None);
    assert!(message.starts_with("Could not load routes: transport error: connection refused"));
    assert!(message.contains("retry"));

    let not_found = Error::not_found("route", 4);
    assert_eq!(describe_error::<Route>(&not_found, Some(4)), "route 4 was not found");
  }
}
