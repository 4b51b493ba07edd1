//! Client-side query cache.
//!
//! This module provides an entity-agnostic caching mechanism that:
//! - Keys cached values by ordered segments (`["busModels", 4]`)
//! - Serves fresh values without a network call and coalesces concurrent fetches
//! - Invalidates by key prefix, flagging entries stale instead of purging them
//! - Persists entries in SQLite so short-lived processes share a cache

mod client;
mod entry;
mod key;
mod storage;

pub use client::{QueryClient, RetryPolicy};
pub use entry::{CacheEntry, CacheEvent, EntryKind};
pub use key::QueryKey;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
