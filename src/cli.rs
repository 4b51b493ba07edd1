//! Command-line arguments.

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use crate::api::{ListParams, SortDirection};
use crate::entity::EntityId;

#[derive(Parser, Debug)]
#[command(name = "fleetq")]
#[command(about = "Query and edit fleet records through a local cache")]
#[command(version)]
pub struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fleetq/config.yaml)
  #[arg(short, long, global = true)]
  pub config: Option<PathBuf>,

  /// API base url, overriding the config file
  #[arg(long, global = true)]
  pub url: Option<String>,

  /// More log output on stderr (repeat for more)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  pub verbose: u8,

  /// Print results as JSON
  #[arg(long, global = true)]
  pub json: bool,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Show the collections that can be queried
  Entities,

  /// List one page of a collection (or all of it)
  List(ListArgs),

  /// Show one record
  Get {
    entity: String,
    #[arg(allow_negative_numbers = true)]
    id: EntityId,
  },

  /// Create a record from JSON
  Create {
    entity: String,
    #[command(flatten)]
    payload: PayloadArgs,
  },

  /// Replace a record with JSON
  Update {
    entity: String,
    #[arg(allow_negative_numbers = true)]
    id: EntityId,
    #[command(flatten)]
    payload: PayloadArgs,
  },

  /// Soft-delete a record
  Delete {
    entity: String,
    #[arg(allow_negative_numbers = true)]
    id: EntityId,
  },

  /// Inspect or reset the local cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct ListArgs {
  pub entity: String,

  /// 1-based page number
  #[arg(long)]
  pub page: Option<u32>,

  /// Records per page (default from config)
  #[arg(long)]
  pub page_size: Option<u32>,

  /// Field to sort by
  #[arg(long)]
  pub sort: Option<String>,

  /// Sort descending
  #[arg(long, requires = "sort")]
  pub desc: bool,

  /// Server-side filter, as field=value (repeatable)
  #[arg(long = "filter", value_parser = parse_filter)]
  pub filters: Vec<(String, String)>,

  /// Fetch the whole collection instead of one page
  #[arg(long, conflicts_with_all = ["page", "page_size"])]
  pub all: bool,
}

impl ListArgs {
  pub fn params(&self, default_page_size: u32) -> ListParams {
    let mut params = ListParams::default()
      .page(self.page.unwrap_or(1))
      .page_size(self.page_size.unwrap_or(default_page_size));

    if let Some(field) = &self.sort {
      let direction = if self.desc {
        SortDirection::Desc
      } else {
        SortDirection::Asc
      };
      params = params.sort(field.clone(), direction);
    }

    for (field, value) in &self.filters {
      params = params.filter(field.clone(), value.clone());
    }
    params
  }
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
#[group(required = true, multiple = false)]
pub struct PayloadArgs {
  /// Record as inline JSON
  #[arg(long)]
  pub data: Option<String>,

  /// Read the record from a JSON file
  #[arg(long)]
  pub file: Option<PathBuf>,
}

impl PayloadArgs {
  pub fn read(&self) -> Result<String> {
    match (&self.data, &self.file) {
      (Some(data), _) => Ok(data.clone()),
      (None, Some(path)) => std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e)),
      (None, None) => Err(eyre!("Pass the record with --data or --file")),
    }
  }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheCommand {
  /// Mark every cached query under a key prefix as stale
  Invalidate {
    /// Collection name, then optional scoping segments (ids or JSON)
    #[arg(required = true)]
    segments: Vec<String>,
  },

  /// Drop every cached query
  Clear,
}

fn parse_filter(s: &str) -> std::result::Result<(String, String), String> {
  match s.split_once('=') {
    Some((field, value)) if !field.trim().is_empty() => {
      Ok((field.trim().to_string(), value.to_string()))
    }
    _ => Err(format!("expected field=value, got '{}'", s)),
  }
}
