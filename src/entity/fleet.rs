//! Fleet records served by the API.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Entity, EntityId, Timestamps};

fn cell<T: ToString>(value: &Option<T>) -> String {
  value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn id_cell(id: Option<EntityId>) -> String {
  id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

// ============================================================================
// Records
// ============================================================================

/// Vehicle model shared by many buses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusModel {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<EntityId>,
  pub name: String,
  pub manufacturer: String,
  #[serde(default)]
  pub seat_capacity: u32,
  #[serde(default)]
  pub standing_capacity: u32,
  #[serde(default)]
  pub fuel_type: Option<String>,
  #[serde(flatten)]
  pub timestamps: Timestamps,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusStatus {
  #[default]
  Active,
  Maintenance,
  Retired,
}

impl fmt::Display for BusStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BusStatus::Active => "active",
      BusStatus::Maintenance => "maintenance",
      BusStatus::Retired => "retired",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<EntityId>,
  pub plate_number: String,
  pub bus_model_id: EntityId,
  #[serde(default)]
  pub terminal_id: Option<EntityId>,
  #[serde(default)]
  pub status: BusStatus,
  #[serde(default)]
  pub year: Option<u16>,
  #[serde(flatten)]
  pub timestamps: Timestamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<EntityId>,
  pub code: String,
  pub name: String,
  pub origin_terminal_id: EntityId,
  pub destination_terminal_id: EntityId,
  #[serde(default)]
  pub distance_km: Option<f64>,
  #[serde(flatten)]
  pub timestamps: Timestamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<EntityId>,
  pub full_name: String,
  pub license_number: String,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub terminal_id: Option<EntityId>,
  #[serde(flatten)]
  pub timestamps: Timestamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Terminal {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<EntityId>,
  pub name: String,
  pub code: String,
  pub population_id: EntityId,
  #[serde(default)]
  pub address: Option<String>,
  #[serde(flatten)]
  pub timestamps: Timestamps,
}

/// City or town served by one or more terminals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Population {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<EntityId>,
  pub name: String,
  pub code: String,
  #[serde(default)]
  pub region: Option<String>,
  #[serde(flatten)]
  pub timestamps: Timestamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<EntityId>,
  pub name: String,
  pub email: String,
  #[serde(default)]
  pub role: String,
  #[serde(flatten)]
  pub timestamps: Timestamps,
}

// ============================================================================
// Entity implementations
// ============================================================================

impl Entity for BusModel {
  fn collection() -> &'static str {
    "busModels"
  }

  fn namespace() -> &'static str {
    "busModels"
  }

  fn path() -> &'static str {
    "bus-models"
  }

  fn label() -> &'static str {
    "bus model"
  }

  fn columns() -> &'static [&'static str] {
    &["ID", "NAME", "MANUFACTURER", "SEATS", "STANDING", "FUEL"]
  }

  fn id(&self) -> Option<EntityId> {
    self.id
  }

  fn set_id(&mut self, id: EntityId) {
    self.id = Some(id);
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn row(&self) -> Vec<String> {
    vec![
      id_cell(self.id),
      self.name.clone(),
      self.manufacturer.clone(),
      self.seat_capacity.to_string(),
      self.standing_capacity.to_string(),
      cell(&self.fuel_type),
    ]
  }
}

impl Entity for Bus {
  fn collection() -> &'static str {
    "buses"
  }

  fn namespace() -> &'static str {
    "buses"
  }

  fn path() -> &'static str {
    "buses"
  }

  fn label() -> &'static str {
    "bus"
  }

  fn columns() -> &'static [&'static str] {
    &["ID", "PLATE", "MODEL", "TERMINAL", "STATUS", "YEAR"]
  }

  fn id(&self) -> Option<EntityId> {
    self.id
  }

  fn set_id(&mut self, id: EntityId) {
    self.id = Some(id);
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn row(&self) -> Vec<String> {
    vec![
      id_cell(self.id),
      self.plate_number.clone(),
      self.bus_model_id.to_string(),
      cell(&self.terminal_id),
      self.status.to_string(),
      cell(&self.year),
    ]
  }
}

impl Entity for Route {
  fn collection() -> &'static str {
    "routes"
  }

  fn namespace() -> &'static str {
    "routes"
  }

  fn path() -> &'static str {
    "routes"
  }

  fn label() -> &'static str {
    "route"
  }

  fn columns() -> &'static [&'static str] {
    &["ID", "CODE", "NAME", "ORIGIN", "DESTINATION", "KM"]
  }

  fn id(&self) -> Option<EntityId> {
    self.id
  }

  fn set_id(&mut self, id: EntityId) {
    self.id = Some(id);
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn row(&self) -> Vec<String> {
    vec![
      id_cell(self.id),
      self.code.clone(),
      self.name.clone(),
      self.origin_terminal_id.to_string(),
      self.destination_terminal_id.to_string(),
      self
        .distance_km
        .map(|km| format!("{:.1}", km))
        .unwrap_or_default(),
    ]
  }
}

impl Entity for Driver {
  fn collection() -> &'static str {
    "drivers"
  }

  fn namespace() -> &'static str {
    "drivers"
  }

  fn path() -> &'static str {
    "drivers"
  }

  fn label() -> &'static str {
    "driver"
  }

  fn columns() -> &'static [&'static str] {
    &["ID", "NAME", "LICENSE", "PHONE", "TERMINAL"]
  }

  fn id(&self) -> Option<EntityId> {
    self.id
  }

  fn set_id(&mut self, id: EntityId) {
    self.id = Some(id);
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn row(&self) -> Vec<String> {
    vec![
      id_cell(self.id),
      self.full_name.clone(),
      self.license_number.clone(),
      cell(&self.phone),
      cell(&self.terminal_id),
    ]
  }
}

impl Entity for Terminal {
  fn collection() -> &'static str {
    "terminals"
  }

  fn namespace() -> &'static str {
    "terminals"
  }

  fn path() -> &'static str {
    "terminals"
  }

  fn label() -> &'static str {
    "terminal"
  }

  fn columns() -> &'static [&'static str] {
    &["ID", "CODE", "NAME", "POPULATION", "ADDRESS"]
  }

  fn id(&self) -> Option<EntityId> {
    self.id
  }

  fn set_id(&mut self, id: EntityId) {
    self.id = Some(id);
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn row(&self) -> Vec<String> {
    vec![
      id_cell(self.id),
      self.code.clone(),
      self.name.clone(),
      self.population_id.to_string(),
      cell(&self.address),
    ]
  }
}

impl Entity for Population {
  fn collection() -> &'static str {
    "populations"
  }

  fn namespace() -> &'static str {
    "populations"
  }

  fn path() -> &'static str {
    "populations"
  }

  fn label() -> &'static str {
    "population"
  }

  fn columns() -> &'static [&'static str] {
    &["ID", "CODE", "NAME", "REGION"]
  }

  fn id(&self) -> Option<EntityId> {
    self.id
  }

  fn set_id(&mut self, id: EntityId) {
    self.id = Some(id);
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn row(&self) -> Vec<String> {
    vec![
      id_cell(self.id),
      self.code.clone(),
      self.name.clone(),
      cell(&self.region),
    ]
  }
}

impl Entity for User {
  fn collection() -> &'static str {
    "users"
  }

  fn namespace() -> &'static str {
    "users"
  }

  fn path() -> &'static str {
    "users"
  }

  fn label() -> &'static str {
    "user"
  }

  fn columns() -> &'static [&'static str] {
    &["ID", "NAME", "EMAIL", "ROLE"]
  }

  fn id(&self) -> Option<EntityId> {
    self.id
  }

  fn set_id(&mut self, id: EntityId) {
    self.id = Some(id);
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn row(&self) -> Vec<String> {
    vec![
      id_cell(self.id),
      self.name.clone(),
      self.email.clone(),
      self.role.clone(),
    ]
  }
}
