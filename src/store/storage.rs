//! Store backend trait and its SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::records::{CachedApiResponse, CachedAsset, Collection, StorageStats};
use super::schema::SCHEMA;
use crate::error::OfflineError;

type Result<T> = std::result::Result<T, OfflineError>;

/// A serialized record as stored in the generic `records` table.
#[derive(Debug, Clone)]
pub struct RecordRow {
  pub id: i64,
  pub index_key: Option<i64>,
  pub synced: Option<bool>,
  pub created_at: Option<DateTime<Utc>>,
  pub last_sync: Option<DateTime<Utc>>,
  pub data: serde_json::Value,
}

/// A record waiting for the store to assign its key.
#[derive(Debug, Clone)]
pub struct PendingRow {
  pub index_key: Option<i64>,
  pub synced: Option<bool>,
  pub created_at: Option<DateTime<Utc>>,
  pub data: serde_json::Value,
}

/// Which rows of a collection to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
  All,
  /// Rows whose secondary index equals the value (e.g. a subject id)
  Index(i64),
  /// Rows with `synced = false`, in creation order
  Unsynced,
}

/// Trait for offline store backends.
///
/// Every method is one atomic unit of work.
pub trait StoreBackend: Send + Sync {
  /// Insert or replace rows as a single batch.
  fn upsert_rows(&self, collection: Collection, rows: &[RecordRow]) -> Result<()>;

  /// Read rows ordered by key.
  fn query_rows(&self, collection: Collection, filter: RecordFilter) -> Result<Vec<RecordRow>>;

  /// Insert a row under the next key of the collection's sequence.
  fn append_row(&self, collection: Collection, row: PendingRow) -> Result<i64>;

  /// Flip `synced` on an unsynced row. Returns whether anything changed.
  fn mark_synced(&self, collection: Collection, id: i64) -> Result<bool>;

  /// Empty every collection.
  fn clear_all(&self) -> Result<()>;

  fn stats(&self) -> Result<StorageStats>;

  fn put_asset(&self, asset: &CachedAsset) -> Result<()>;

  fn get_asset(&self, generation: &str, url: &str) -> Result<Option<CachedAsset>>;

  /// Overwrite the cached response for an identity.
  fn put_response(&self, response: &CachedApiResponse) -> Result<()>;

  fn get_response(&self, identity: &str) -> Result<Option<CachedApiResponse>>;

  /// Delete cached assets and responses of every generation not in `keep`.
  fn delete_generations_except(&self, keep: &[String]) -> Result<usize>;

  fn meta(&self, key: &str) -> Result<Option<String>>;

  fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

/// Backend used when the database could not be opened.
///
/// Reads see an empty store; writes fail so that locally created data is never
/// dropped silently.
pub struct UnavailableStorage {
  reason: String,
}

impl UnavailableStorage {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
    }
  }

  fn refuse<T>(&self) -> Result<T> {
    Err(OfflineError::StorageInitFailure(self.reason.clone()))
  }
}

impl StoreBackend for UnavailableStorage {
  fn upsert_rows(&self, _collection: Collection, _rows: &[RecordRow]) -> Result<()> {
    self.refuse()
  }

  fn query_rows(&self, _collection: Collection, _filter: RecordFilter) -> Result<Vec<RecordRow>> {
    Ok(Vec::new())
  }

  fn append_row(&self, _collection: Collection, _row: PendingRow) -> Result<i64> {
    self.refuse()
  }

  fn mark_synced(&self, _collection: Collection, _id: i64) -> Result<bool> {
    Ok(false)
  }

  fn clear_all(&self) -> Result<()> {
    Ok(()) // Nothing stored
  }

  fn stats(&self) -> Result<StorageStats> {
    Ok(StorageStats::default())
  }

  fn put_asset(&self, _asset: &CachedAsset) -> Result<()> {
    self.refuse()
  }

  fn get_asset(&self, _generation: &str, _url: &str) -> Result<Option<CachedAsset>> {
    Ok(None) // Always miss
  }

  fn put_response(&self, _response: &CachedApiResponse) -> Result<()> {
    self.refuse()
  }

  fn get_response(&self, _identity: &str) -> Result<Option<CachedApiResponse>> {
    Ok(None) // Always miss
  }

  fn delete_generations_except(&self, _keep: &[String]) -> Result<usize> {
    Ok(0)
  }

  fn meta(&self, _key: &str) -> Result<Option<String>> {
    Ok(None)
  }

  fn set_meta(&self, _key: &str, _value: &str) -> Result<()> {
    self.refuse()
  }
}

/// SQLite-based store backend.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        OfflineError::StorageInitFailure(format!(
          "failed to create {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      OfflineError::StorageInitFailure(format!("failed to open {}: {}", path.display(), e))
    })?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| OfflineError::StorageInitFailure(e.to_string()))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| OfflineError::StorageInitFailure(format!("migrations failed: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("studysync").join("offline.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| OfflineError::LockPoisoned)
  }
}

fn sequence_key(collection: Collection) -> String {
  format!("seq:{}", collection.name())
}

fn to_text(at: Option<DateTime<Utc>>) -> Option<String> {
  at.map(|t| t.to_rfc3339())
}

fn from_text(s: Option<String>) -> Option<DateTime<Utc>> {
  s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
    .map(|t| t.with_timezone(&Utc))
}

fn read_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(RecordRow, String)> {
  let data: String = row.get(5)?;
  Ok((
    RecordRow {
      id: row.get(0)?,
      index_key: row.get(1)?,
      synced: row.get(2)?,
      created_at: from_text(row.get(3)?),
      last_sync: from_text(row.get(4)?),
      data: serde_json::Value::Null,
    },
    data,
  ))
}

impl StoreBackend for SqliteStorage {
  fn upsert_rows(&self, collection: Collection, rows: &[RecordRow]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    {
      let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO records (collection, id, index_key, synced, created_at, last_sync, data)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
      )?;
      for row in rows {
        let data = serde_json::to_string(&row.data)?;
        stmt.execute(params![
          collection.name(),
          row.id,
          row.index_key,
          row.synced,
          to_text(row.created_at),
          to_text(row.last_sync),
          data,
        ])?;
      }
    }
    tx.commit()?;
    Ok(())
  }

  fn query_rows(&self, collection: Collection, filter: RecordFilter) -> Result<Vec<RecordRow>> {
    let conn = self.lock()?;
    let base = "SELECT id, index_key, synced, created_at, last_sync, data FROM records
                WHERE collection = ?1";

    let (sql, index) = match filter {
      RecordFilter::All => (format!("{} ORDER BY id", base), None),
      RecordFilter::Index(key) => (format!("{} AND index_key = ?2 ORDER BY id", base), Some(key)),
      RecordFilter::Unsynced => (format!("{} AND synced = 0 ORDER BY id", base), None),
    };

    let mut stmt = conn.prepare(&sql)?;
    let raw = match index {
      Some(key) => stmt
        .query_map(params![collection.name(), key], read_record_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?,
      None => stmt
        .query_map(params![collection.name()], read_record_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?,
    };

    raw
      .into_iter()
      .map(|(mut row, data)| -> Result<RecordRow> {
        row.data = serde_json::from_str(&data)?;
        Ok(row)
      })
      .collect()
  }

  fn append_row(&self, collection: Collection, row: PendingRow) -> Result<i64> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let seq = sequence_key(collection);
    let last: Option<String> = tx
      .query_row("SELECT value FROM meta WHERE key = ?", params![seq], |r| r.get(0))
      .optional()?;
    let id = last.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0) + 1;

    let mut data = row.data;
    if let Some(obj) = data.as_object_mut() {
      obj.insert("id".to_string(), serde_json::json!(id));
    }

    tx.execute(
      "INSERT INTO records (collection, id, index_key, synced, created_at, last_sync, data)
       VALUES (?, ?, ?, ?, ?, NULL, ?)",
      params![
        collection.name(),
        id,
        row.index_key,
        row.synced,
        to_text(row.created_at),
        serde_json::to_string(&data)?,
      ],
    )?;
    tx.execute(
      "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
      params![seq, id.to_string()],
    )?;

    tx.commit()?;
    Ok(id)
  }

  fn mark_synced(&self, collection: Collection, id: i64) -> Result<bool> {
    let conn = self.lock()?;
    let changed = conn.execute(
      "UPDATE records SET synced = 1, data = json_set(data, '$.synced', json('true'))
       WHERE collection = ? AND id = ? AND synced = 0",
      params![collection.name(), id],
    )?;
    Ok(changed > 0)
  }

  fn clear_all(&self) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM records", [])?;
    tx.execute("DELETE FROM static_assets", [])?;
    tx.execute("DELETE FROM api_responses", [])?;
    tx.commit()?;
    Ok(())
  }

  fn stats(&self) -> Result<StorageStats> {
    let conn = self.lock()?;
    let count = |sql: &str, arg: Option<&str>| -> Result<u64> {
      let n: i64 = match arg {
        Some(a) => conn.query_row(sql, params![a], |r| r.get(0))?,
        None => conn.query_row(sql, [], |r| r.get(0))?,
      };
      Ok(n.max(0) as u64)
    };
    let in_collection = "SELECT COUNT(*) FROM records WHERE collection = ?";

    Ok(StorageStats {
      static_assets: count("SELECT COUNT(*) FROM static_assets", None)?,
      api_responses: count("SELECT COUNT(*) FROM api_responses", None)?,
      flashcards: count(in_collection, Some(Collection::Flashcards.name()))?,
      tests: count(in_collection, Some(Collection::Tests.name()))?,
      test_results: count(
        "SELECT COUNT(*) FROM records WHERE collection = ? AND synced = 0",
        Some(Collection::TestResults.name()),
      )?,
      sync_queue: count(
        "SELECT COUNT(*) FROM records d
         WHERE d.collection = 'sync_queue'
           AND EXISTS (SELECT 1 FROM records r
                       WHERE r.collection = ? AND r.id = d.index_key AND r.synced = 0)",
        Some(Collection::TestResults.name()),
      )?,
    })
  }

  fn put_asset(&self, asset: &CachedAsset) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO static_assets (generation, url, content_type, body, cached_at)
       VALUES (?, ?, ?, ?, ?)",
      params![
        asset.generation,
        asset.url,
        asset.content_type,
        asset.body,
        asset.cached_at.to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  fn get_asset(&self, generation: &str, url: &str) -> Result<Option<CachedAsset>> {
    let conn = self.lock()?;
    let asset = conn
      .query_row(
        "SELECT content_type, body, cached_at FROM static_assets
         WHERE generation = ? AND url = ?",
        params![generation, url],
        |row| {
          Ok(CachedAsset {
            url: url.to_string(),
            generation: generation.to_string(),
            content_type: row.get(0)?,
            body: row.get(1)?,
            cached_at: from_text(row.get(2)?).unwrap_or_else(Utc::now),
          })
        },
      )
      .optional()?;
    Ok(asset)
  }

  fn put_response(&self, response: &CachedApiResponse) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO api_responses
         (identity, method, url, status, content_type, body, generation, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        response.identity,
        response.method,
        response.url,
        response.status,
        response.content_type,
        response.body,
        response.generation,
        response.cached_at.to_rfc3339(),
      ],
    )?;
    Ok(())
  }

  fn get_response(&self, identity: &str) -> Result<Option<CachedApiResponse>> {
    let conn = self.lock()?;
    let response = conn
      .query_row(
        "SELECT method, url, status, content_type, body, generation, cached_at
         FROM api_responses WHERE identity = ?",
        params![identity],
        |row| {
          Ok(CachedApiResponse {
            identity: identity.to_string(),
            method: row.get(0)?,
            url: row.get(1)?,
            status: row.get(2)?,
            content_type: row.get(3)?,
            body: row.get(4)?,
            generation: row.get(5)?,
            cached_at: from_text(row.get(6)?).unwrap_or_else(Utc::now),
          })
        },
      )
      .optional()?;
    Ok(response)
  }

  fn delete_generations_except(&self, keep: &[String]) -> Result<usize> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let deleted = if keep.is_empty() {
      tx.execute("DELETE FROM static_assets", [])? + tx.execute("DELETE FROM api_responses", [])?
    } else {
      let placeholders = vec!["?"; keep.len()].join(", ");
      let assets = tx.execute(
        &format!("DELETE FROM static_assets WHERE generation NOT IN ({})", placeholders),
        params_from_iter(keep.iter()),
      )?;
      let responses = tx.execute(
        &format!("DELETE FROM api_responses WHERE generation NOT IN ({})", placeholders),
        params_from_iter(keep.iter()),
      )?;
      assets + responses
    };

    tx.commit()?;
    Ok(deleted)
  }

  fn meta(&self, key: &str) -> Result<Option<String>> {
    let conn = self.lock()?;
    let value = conn
      .query_row("SELECT value FROM meta WHERE key = ?", params![key], |r| r.get(0))
      .optional()?;
    Ok(value)
  }

  fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
      params![key, value],
    )?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn row(id: i64, subject: i64) -> RecordRow {
    RecordRow {
      id,
      index_key: Some(subject),
      synced: None,
      created_at: None,
      last_sync: Some(Utc::now()),
      data: json!({ "id": id, "subjectId": subject }),
    }
  }

  fn pending(test_id: i64) -> PendingRow {
    PendingRow {
      index_key: Some(test_id),
      synced: Some(false),
      created_at: Some(Utc::now()),
      data: json!({ "testId": test_id, "synced": false }),
    }
  }

  #[test]
  fn test_upsert_and_filter_by_index() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .upsert_rows(Collection::Flashcards, &[row(1, 5), row(2, 5), row(3, 6)])
      .unwrap();

    let subject5 = storage
      .query_rows(Collection::Flashcards, RecordFilter::Index(5))
      .unwrap();
    assert_eq!(subject5.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);

    let all = storage
      .query_rows(Collection::Flashcards, RecordFilter::All)
      .unwrap();
    assert_eq!(all.len(), 3);

    // Other collections are untouched
    assert!(storage
      .query_rows(Collection::Tests, RecordFilter::All)
      .unwrap()
      .is_empty());
  }

  #[test]
  fn test_upsert_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.upsert_rows(Collection::Tests, &[row(7, 5)]).unwrap();
    storage.upsert_rows(Collection::Tests, &[row(7, 5)]).unwrap();
    assert_eq!(storage.stats().unwrap().tests, 1);
  }

  #[test]
  fn test_append_assigns_increasing_keys_that_survive_clear() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let first = storage.append_row(Collection::TestResults, pending(9)).unwrap();
    let second = storage.append_row(Collection::TestResults, pending(9)).unwrap();
    assert_eq!((first, second), (1, 2));

    let rows = storage
      .query_rows(Collection::TestResults, RecordFilter::All)
      .unwrap();
    assert_eq!(rows[1].data["id"], 2);

    storage.clear_all().unwrap();
    let third = storage.append_row(Collection::TestResults, pending(9)).unwrap();
    assert_eq!(third, 3);
  }

  #[test]
  fn test_mark_synced_updates_flag_and_data() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let id = storage.append_row(Collection::TestResults, pending(9)).unwrap();

    assert!(storage.mark_synced(Collection::TestResults, id).unwrap());
    assert!(!storage.mark_synced(Collection::TestResults, id).unwrap());
    assert!(!storage.mark_synced(Collection::TestResults, 999).unwrap());

    assert!(storage
      .query_rows(Collection::TestResults, RecordFilter::Unsynced)
      .unwrap()
      .is_empty());
    let rows = storage
      .query_rows(Collection::TestResults, RecordFilter::All)
      .unwrap();
    assert_eq!(rows[0].synced, Some(true));
    assert_eq!(rows[0].data["synced"], true);
  }

  #[test]
  fn test_response_overwrite_keeps_one_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut response = CachedApiResponse {
      identity: "abc".to_string(),
      method: "GET".to_string(),
      url: "https://study.example/api/subjects".to_string(),
      status: 200,
      content_type: Some("application/json".to_string()),
      body: b"[1]".to_vec(),
      generation: "api-v1".to_string(),
      cached_at: Utc::now(),
    };
    storage.put_response(&response).unwrap();
    response.body = b"[1,2]".to_vec();
    storage.put_response(&response).unwrap();

    assert_eq!(storage.stats().unwrap().api_responses, 1);
    let cached = storage.get_response("abc").unwrap().unwrap();
    assert_eq!(cached.body, b"[1,2]".to_vec());
  }

  #[test]
  fn test_delete_generations_except() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    for generation in ["static-v1", "static-v2"] {
      storage
        .put_asset(&CachedAsset {
          url: "https://study.example/app.js".to_string(),
          generation: generation.to_string(),
          content_type: None,
          body: generation.as_bytes().to_vec(),
          cached_at: Utc::now(),
        })
        .unwrap();
    }

    let deleted = storage
      .delete_generations_except(&["static-v2".to_string(), "api-v2".to_string()])
      .unwrap();
    assert_eq!(deleted, 1);
    assert!(storage
      .get_asset("static-v1", "https://study.example/app.js")
      .unwrap()
      .is_none());
    assert!(storage
      .get_asset("static-v2", "https://study.example/app.js")
      .unwrap()
      .is_some());
  }

  #[test]
  fn test_unavailable_storage_refuses_writes() {
    let storage = UnavailableStorage::new("disk missing");
    assert!(matches!(
      storage.append_row(Collection::TestResults, pending(9)),
      Err(OfflineError::StorageInitFailure(_))
    ));
    assert!(storage
      .query_rows(Collection::TestResults, RecordFilter::All)
      .unwrap()
      .is_empty());
    assert!(storage.stats().unwrap().is_empty());
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("offline.db");
    let storage = SqliteStorage::open(&path).unwrap();
    storage.set_meta("activated_version", "1.2.0").unwrap();
    drop(storage);

    let reopened = SqliteStorage::open(&path).unwrap();
    assert_eq!(
      reopened.meta("activated_version").unwrap().as_deref(),
      Some("1.2.0")
    );
  }
}
