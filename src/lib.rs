//! Cached, typed access to the fleet management API.
//!
//! Records live in collections (bus models, buses, routes, ...). Reads go
//! through a query cache keyed by ordered segments; writes go through
//! mutations that invalidate the collection's key prefix on success.

pub mod api;
pub mod app;
pub mod cache;
pub mod cli;
pub mod collection;
pub mod config;
pub mod entities;
pub mod entity;
pub mod error;
pub mod logging;
pub mod messages;
pub mod mutation;
pub mod output;
pub mod query;
pub mod toast;

pub use error::{Error, Result};
