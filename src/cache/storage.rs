//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::entry::{CacheEntry, EntryKind};
use super::key::QueryKey;
use crate::error::{Error, Result};

/// Trait for cache storage backends.
///
/// Values are stored as JSON so a backend can outlive the process that wrote
/// them; typing happens in the query client.
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under exactly this key.
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry.
  fn put(&self, key: &QueryKey, entry: &CacheEntry) -> Result<()>;

  /// All entries whose key starts with `prefix`.
  fn entries_with_prefix(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>>;

  /// Flag every entry under `prefix` as invalidated. Returns how many matched.
  fn invalidate_prefix(&self, prefix: &QueryKey) -> Result<usize>;

  /// Drop every entry under `prefix`. Returns how many were removed.
  fn remove_prefix(&self, prefix: &QueryKey) -> Result<usize>;

  /// Drop everything.
  fn clear(&self) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
  mutex
    .lock()
    .map_err(|e| Error::Storage(format!("lock poisoned: {}", e)))
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Process-lifetime storage, keyed by the canonical key text.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, (QueryKey, CacheEntry)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    let entries = lock(&self.entries)?;
    Ok(entries.get(&key.canonical()).map(|(_, entry)| entry.clone()))
  }

  fn put(&self, key: &QueryKey, entry: &CacheEntry) -> Result<()> {
    let mut entries = lock(&self.entries)?;
    entries.insert(key.canonical(), (key.clone(), entry.clone()));
    Ok(())
  }

  fn entries_with_prefix(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>> {
    let entries = lock(&self.entries)?;
    Ok(
      entries
        .values()
        .filter(|(key, _)| key.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }

  fn invalidate_prefix(&self, prefix: &QueryKey) -> Result<usize> {
    let mut entries = lock(&self.entries)?;
    let mut count = 0;
    for (key, entry) in entries.values_mut() {
      if key.starts_with(prefix) {
        entry.invalidated = true;
        count += 1;
      }
    }
    Ok(count)
  }

  fn remove_prefix(&self, prefix: &QueryKey) -> Result<usize> {
    let mut entries = lock(&self.entries)?;
    let before = entries.len();
    entries.retain(|_, (key, _)| !key.starts_with(prefix));
    Ok(before - entries.len())
  }

  fn clear(&self) -> Result<()> {
    lock(&self.entries)?.clear();
    Ok(())
  }
}

// ============================================================================
// SQLite storage
// ============================================================================

/// SQLite-based cache storage, used to keep query results between runs.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    collection TEXT,
    kind TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_query_cache_collection
    ON query_cache(collection);
"#;

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Storage(format!("failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::Storage(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives as long as the storage.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    Self::with_connection(conn)
  }

  /// Default database location under the user data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Storage("could not determine data directory".to_string()))?;

    Ok(data_dir.join("fleetq").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::Storage(format!("failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Rows whose collection column could match `prefix`, before segment filtering.
  fn collection_rows<R>(
    conn: &Connection,
    prefix: &QueryKey,
    columns: &str,
    mut read: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<R>,
  ) -> Result<Vec<R>> {
    let mut rows = Vec::new();
    let (sql, collection) = match prefix.collection_name() {
      Some(collection) => (
        format!("SELECT {} FROM query_cache WHERE collection = ?", columns),
        Some(collection),
      ),
      None => (format!("SELECT {} FROM query_cache", columns), None),
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut result = match collection {
      Some(collection) => stmt.query(params![collection])?,
      None => stmt.query([])?,
    };
    while let Some(row) = result.next()? {
      rows.push(read(row)?);
    }
    Ok(rows)
  }

  /// Hashes of the rows under `prefix`. Only the key is decoded, so a row with
  /// unreadable data is still matched; one with an unreadable key is skipped.
  fn hashes_under(conn: &Connection, prefix: &QueryKey) -> Result<Vec<String>> {
    let rows = Self::collection_rows(conn, prefix, "query_hash, query_key", |row| {
      Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(hash, key)| match serde_json::from_str::<QueryKey>(&key) {
          Ok(key) => key.starts_with(prefix).then_some(hash),
          Err(err) => {
            warn!(hash = %hash, error = %err, "skipping cache row with unreadable key");
            None
          }
        })
        .collect(),
    )
  }
}

fn decode_entry(kind: &str, data: &[u8], cached_at: &str, invalidated: bool) -> Result<CacheEntry> {
  let kind = EntryKind::parse(kind)
    .ok_or_else(|| Error::Storage(format!("unknown cache entry kind '{}'", kind)))?;
  let data = serde_json::from_slice(data)?;
  let cached_at = parse_datetime(cached_at)?;
  Ok(CacheEntry {
    kind,
    data,
    cached_at,
    invalidated,
  })
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    let conn = lock(&self.conn)?;

    let row: Option<(String, Vec<u8>, String, bool)> = conn
      .query_row(
        "SELECT kind, data, cached_at, invalidated FROM query_cache WHERE query_hash = ?",
        params![key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| Error::Storage(format!("failed to read cache entry: {}", e)))?;

    match row {
      Some((kind, data, cached_at, invalidated)) => {
        decode_entry(&kind, &data, &cached_at, invalidated).map(Some)
      }
      None => Ok(None),
    }
  }

  fn put(&self, key: &QueryKey, entry: &CacheEntry) -> Result<()> {
    let conn = lock(&self.conn)?;
    let data = serde_json::to_vec(&entry.data)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_key, collection, kind, data, cached_at, invalidated)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          key.cache_hash(),
          key.canonical(),
          key.collection_name(),
          entry.kind.as_str(),
          data,
          entry.cached_at.to_rfc3339(),
          entry.invalidated,
        ],
      )
      .map_err(|e| Error::Storage(format!("failed to store cache entry: {}", e)))?;

    Ok(())
  }

  fn entries_with_prefix(&self, prefix: &QueryKey) -> Result<Vec<(QueryKey, CacheEntry)>> {
    let conn = lock(&self.conn)?;
    let rows = Self::collection_rows(
      &conn,
      prefix,
      "query_key, kind, data, cached_at, invalidated",
      |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, Vec<u8>>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, bool>(4)?,
        ))
      },
    )?;

    let mut entries = Vec::new();
    for (key, kind, data, cached_at, invalidated) in rows {
      let decoded = serde_json::from_str::<QueryKey>(&key)
        .map_err(Error::from)
        .and_then(|key| Ok((key, decode_entry(&kind, &data, &cached_at, invalidated)?)));
      match decoded {
        Ok((key, entry)) if key.starts_with(prefix) => entries.push((key, entry)),
        Ok(_) => {}
        Err(err) => warn!(key = %key, error = %err, "skipping unreadable cache row"),
      }
    }
    Ok(entries)
  }

  fn invalidate_prefix(&self, prefix: &QueryKey) -> Result<usize> {
    let mut conn = lock(&self.conn)?;
    let hashes = Self::hashes_under(&conn, prefix)?;

    let tx = conn.transaction()?;
    for hash in &hashes {
      tx.execute(
        "UPDATE query_cache SET invalidated = 1 WHERE query_hash = ?",
        params![hash],
      )?;
    }
    tx.commit()
      .map_err(|e| Error::Storage(format!("failed to commit invalidation: {}", e)))?;

    Ok(hashes.len())
  }

  fn remove_prefix(&self, prefix: &QueryKey) -> Result<usize> {
    let mut conn = lock(&self.conn)?;
    let hashes = Self::hashes_under(&conn, prefix)?;

    let tx = conn.transaction()?;
    for hash in &hashes {
      tx.execute("DELETE FROM query_cache WHERE query_hash = ?", params![hash])?;
    }
    tx.commit()?;

    Ok(hashes.len())
  }

  fn clear(&self) -> Result<()> {
    let conn = lock(&self.conn)?;
    conn.execute("DELETE FROM query_cache", [])?;
    Ok(())
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Storage(format!("failed to parse datetime '{}': {}", s, e)))
}
