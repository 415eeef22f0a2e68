//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

use super::traits::{CachedEntry, StoreInfo};
use crate::http::{RequestKey, Response};

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each mapping request identity to a
/// response. Stores are enumerated in the order they were created.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Whether the named store exists.
  fn has_store(&self, name: &str) -> Result<bool>;

  /// Names of all stores, oldest first.
  fn list_store_identifiers(&self) -> Result<Vec<String>>;

  /// Delete a store and everything in it. Returns false if it did not exist.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Write a batch of entries into a store in one transaction (upsert by key).
  ///
  /// Either every entry is written or none is.
  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up a request in a single store.
  fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Look up a request across all stores, oldest store first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Request identities held by a store, in insertion order.
  fn keys(&self, name: &str) -> Result<Vec<RequestKey>>;

  /// Every store with its entry count.
  fn stores(&self) -> Result<Vec<StoreInfo>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the database at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named stores; rowid gives creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, method, url),
    FOREIGN KEY (cache_name) REFERENCES cache_stores(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_request
    ON cache_entries(method, url);
"#;

const ENTRY_COLUMNS: &str = "e.cache_name, e.method, e.url, e.response_url, e.status, \
  e.status_text, e.headers, e.body, e.cached_at";

/// Entry columns as read from SQLite, before decoding.
struct EntryRow {
  cache_name: String,
  method: String,
  url: String,
  response_url: String,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl EntryRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      cache_name: row.get(0)?,
      method: row.get(1)?,
      url: row.get(2)?,
      response_url: row.get(3)?,
      status: row.get(4)?,
      status_text: row.get(5)?,
      headers: row.get(6)?,
      body: row.get(7)?,
      cached_at: row.get(8)?,
    })
  }

  fn into_entry(self) -> Result<CachedEntry> {
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", self.url, e))?;
    let url = Url::parse(&self.response_url)
      .map_err(|e| eyre!("Invalid stored URL '{}': {}", self.response_url, e))?;

    Ok(CachedEntry {
      cache_name: self.cache_name,
      key: RequestKey {
        method: self.method,
        url: self.url,
      },
      response: Response {
        url,
        status: self.status,
        status_text: self.status_text,
        headers,
        body: self.body,
      },
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, datetime('now'))",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;

    Ok(())
  }

  fn has_store(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache store {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn list_store_identifiers(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, datetime('now'))",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers for {}: {}", key, e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, method, url, response_url, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          name,
          key.method,
          key.url,
          response.url.as_str(),
          response.status,
          response.status_text,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key, name, e))?;
    }

    // Dropping the transaction without commit rolls every write back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    if !key.is_cacheable() {
      return Ok(None);
    }

    let conn = self.lock()?;
    let sql = format!(
      "SELECT {} FROM cache_entries e WHERE e.cache_name = ? AND e.method = ? AND e.url = ?",
      ENTRY_COLUMNS
    );

    let row = conn
      .query_row(&sql, params![name, key.method, key.url], EntryRow::from_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, name, e))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    if !key.is_cacheable() {
      return Ok(None);
    }

    let conn = self.lock()?;
    let sql = format!(
      "SELECT {} FROM cache_entries e
       INNER JOIN cache_stores s ON s.name = e.cache_name
       WHERE e.method = ? AND e.url = ?
       ORDER BY s.rowid
       LIMIT 1",
      ENTRY_COLUMNS
    );

    let row = conn
      .query_row(&sql, params![key.method, key.url], EntryRow::from_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn keys(&self, name: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE cache_name = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key of {}: {}", name, e))?;

    Ok(keys)
  }

  fn stores(&self) -> Result<Vec<StoreInfo>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT s.name, s.created_at, COUNT(e.url) FROM cache_stores s
         LEFT JOIN cache_entries e ON e.cache_name = s.name
         GROUP BY s.name
         ORDER BY s.rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache store: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, entries)| {
        Ok(StoreInfo {
          name,
          entries: entries as usize,
          created_at: parse_datetime(&created_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(url: &str, body: &str) -> (RequestKey, Response) {
    let url = Url::parse(url).unwrap();
    (
      RequestKey::new("GET", &url),
      Response {
        url,
        status: 200,
        status_text: "OK".to_string(),
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body: body.as_bytes().to_vec(),
      },
    )
  }

  #[test]
  fn test_open_store_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("v1").unwrap();
    storage.open_store("v1").unwrap();

    assert!(storage.has_store("v1").unwrap());
    assert!(!storage.has_store("v2").unwrap());
    assert_eq!(storage.list_store_identifiers().unwrap(), vec!["v1"]);
  }

  #[test]
  fn test_stores_listed_in_creation_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    for name in ["zeta", "alpha", "mid"] {
      storage.open_store(name).unwrap();
    }

    assert_eq!(
      storage.list_store_identifiers().unwrap(),
      vec!["zeta", "alpha", "mid"]
    );
  }

  #[test]
  fn test_put_and_match_round_trip() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let (key, resp) = response("http://localhost/index.html", "<html>");
    storage.put_all("v1", &[(key.clone(), resp.clone())]).unwrap();

    let entry = storage.match_in("v1", &key).unwrap().unwrap();
    assert_eq!(entry.cache_name, "v1");
    assert_eq!(entry.response, resp);
    assert!(storage.match_in("v2", &key).unwrap().is_none());
  }

  #[test]
  fn test_put_all_replaces_existing_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let first = response("http://localhost/app.js", "one");
    let second = response("http://localhost/app.js", "two");

    storage.put_all("v1", &[first]).unwrap();
    storage.put_all("v1", &[second]).unwrap();

    let keys = storage.keys("v1").unwrap();
    assert_eq!(keys.len(), 1);
    let entry = storage.match_in("v1", &keys[0]).unwrap().unwrap();
    assert_eq!(entry.response.body, b"two");
  }

  #[test]
  fn test_match_any_prefers_oldest_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let (key, old) = response("http://localhost/index.html", "old");
    let (_, new) = response("http://localhost/index.html", "new");

    storage.put_all("v1", &[(key.clone(), old)]).unwrap();
    storage.put_all("v2", &[(key.clone(), new)]).unwrap();

    let entry = storage.match_any(&key).unwrap().unwrap();
    assert_eq!(entry.cache_name, "v1");
    assert_eq!(entry.response.body, b"old");
  }

  #[test]
  fn test_non_get_never_matches() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let (key, resp) = response("http://localhost/form", "ok");
    storage.put_all("v1", &[(key.clone(), resp)]).unwrap();

    let post = RequestKey {
      method: "POST".to_string(),
      url: key.url.clone(),
    };
    assert!(storage.match_any(&post).unwrap().is_none());
    assert!(storage.match_in("v1", &post).unwrap().is_none());
  }

  #[test]
  fn test_delete_store_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let (key, resp) = response("http://localhost/index.html", "x");
    storage.put_all("v0", &[(key.clone(), resp)]).unwrap();

    assert!(storage.delete_store("v0").unwrap());
    assert!(!storage.delete_store("v0").unwrap());
    assert!(storage.match_any(&key).unwrap().is_none());
    assert!(storage.keys("v0").unwrap().is_empty());
  }

  #[test]
  fn test_stores_reports_entry_counts() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("empty").unwrap();
    storage
      .put_all(
        "full",
        &[
          response("http://localhost/a", "a"),
          response("http://localhost/b", "b"),
        ],
      )
      .unwrap();

    let stores = storage.stores().unwrap();
    let counts: Vec<_> = stores.iter().map(|s| (s.name.as_str(), s.entries)).collect();
    assert_eq!(counts, vec![("empty", 0), ("full", 2)]);
  }

  #[test]
  fn test_open_on_disk_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let (key, resp) = response("http://localhost/index.html", "persisted");

    {
      let storage = SqliteStorage::open(Some(&path)).unwrap();
      storage.put_all("v1", &[(key.clone(), resp)]).unwrap();
    }

    let storage = SqliteStorage::open(Some(&path)).unwrap();
    let entry = storage.match_any(&key).unwrap().unwrap();
    assert_eq!(entry.response.body, b"persisted");
  }
}
