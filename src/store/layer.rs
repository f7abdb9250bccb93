//! Async facade over a store backend.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::records::{
  Appendable, CachedApiResponse, CachedAsset, Record, Snapshot, StorageStats,
};
use super::storage::{PendingRow, RecordFilter, RecordRow, SqliteStorage, StoreBackend, UnavailableStorage};
use crate::error::OfflineError;

type Result<T> = std::result::Result<T, OfflineError>;

const ACTIVATED_VERSION_KEY: &str = "activated_version";

/// Durable offline store shared by the interceptor, the sync queue and callers.
///
/// Every operation runs on the blocking pool and is atomic on its own; there
/// are no transactions spanning two calls.
#[derive(Clone)]
pub struct OfflineStore {
  backend: Arc<dyn StoreBackend>,
  unavailable_reason: Option<Arc<str>>,
}

impl OfflineStore {
  /// Wrap an already opened backend.
  pub fn new(backend: impl StoreBackend + 'static) -> Self {
    Self {
      backend: Arc::new(backend),
      unavailable_reason: None,
    }
  }

  /// Open the SQLite store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    Ok(Self::new(SqliteStorage::open(path)?))
  }

  /// Online-only store: reads are empty and writes fail with `StorageInitFailure`.
  pub fn unavailable(reason: impl Into<String>) -> Self {
    let reason: String = reason.into();
    Self {
      unavailable_reason: Some(Arc::from(reason.as_str())),
      backend: Arc::new(UnavailableStorage::new(reason)),
    }
  }

  /// Whether data written now survives a restart.
  pub fn is_available(&self) -> bool {
    self.unavailable_reason.is_none()
  }

  /// Why the database could not be opened, in online-only mode.
  pub fn unavailable_reason(&self) -> Option<&str> {
    self.unavailable_reason.as_deref()
  }

  async fn blocking<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&dyn StoreBackend) -> Result<T> + Send + 'static,
  {
    let backend = Arc::clone(&self.backend);
    tokio::task::spawn_blocking(move || f(backend.as_ref()))
      .await
      .map_err(|e| OfflineError::TaskFailed(e.to_string()))?
  }

  /// Write remote snapshots as one batch, stamping each with a fresh `last_sync`.
  ///
  /// Nothing is written if any record fails validation.
  pub async fn upsert_many<T: Snapshot>(&self, records: Vec<T>) -> Result<Vec<T>> {
    for record in &records {
      record.validate()?;
    }

    let now = Utc::now();
    let mut stamped = Vec::with_capacity(records.len());
    let mut rows = Vec::with_capacity(records.len());
    for mut record in records {
      record.stamp_last_sync(now);
      let id = record
        .key()
        .ok_or_else(|| OfflineError::invalid(T::COLLECTION.name(), "snapshot without id"))?;
      rows.push(RecordRow {
        id,
        index_key: record.index_key(),
        synced: record.synced(),
        created_at: record.created_at(),
        last_sync: Some(now),
        data: serde_json::to_value(&record)?,
      });
      stamped.push(record);
    }

    let count = rows.len();
    self
      .blocking(move |backend| backend.upsert_rows(T::COLLECTION, &rows))
      .await?;
    debug!(collection = %T::COLLECTION, count, "upserted records");

    Ok(stamped)
  }

  /// Read every record of `T`'s collection matching `filter`.
  pub async fn get_all<T: Record>(&self, filter: RecordFilter) -> Result<Vec<T>> {
    let rows = self
      .blocking(move |backend| backend.query_rows(T::COLLECTION, filter))
      .await?;

    Ok(
      rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row.data) {
          Ok(record) => Some(record),
          Err(e) => {
            warn!(collection = %T::COLLECTION, id = row.id, "skipping unreadable record: {}", e);
            None
          }
        })
        .collect(),
    )
  }

  /// Store a locally originated record under a newly assigned key.
  pub async fn append<T: Appendable>(&self, mut record: T) -> Result<T> {
    record.validate()?;

    let row = PendingRow {
      index_key: record.index_key(),
      synced: record.synced(),
      created_at: record.created_at(),
      data: serde_json::to_value(&record)?,
    };
    let key = self
      .blocking(move |backend| backend.append_row(T::COLLECTION, row))
      .await?;
    record.assign_key(key);
    debug!(collection = %T::COLLECTION, key, "appended record");

    Ok(record)
  }

  /// Mark a record synced. Missing or already synced records are a no-op.
  pub async fn mark_synced<T: Appendable>(&self, id: i64) -> Result<()> {
    let changed = self
      .blocking(move |backend| backend.mark_synced(T::COLLECTION, id))
      .await?;
    if !changed {
      debug!(collection = %T::COLLECTION, id, "mark_synced had nothing to change");
    }
    Ok(())
  }

  /// Empty every collection. Not recoverable.
  pub async fn clear_all(&self) -> Result<()> {
    self.blocking(|backend| backend.clear_all()).await
  }

  pub async fn get_stats(&self) -> Result<StorageStats> {
    self.blocking(|backend| backend.stats()).await
  }

  pub async fn put_asset(&self, asset: CachedAsset) -> Result<()> {
    self.blocking(move |backend| backend.put_asset(&asset)).await
  }

  pub async fn get_asset(&self, generation: &str, url: &str) -> Result<Option<CachedAsset>> {
    let (generation, url) = (generation.to_string(), url.to_string());
    self
      .blocking(move |backend| backend.get_asset(&generation, &url))
      .await
  }

  pub async fn put_response(&self, response: CachedApiResponse) -> Result<()> {
    self
      .blocking(move |backend| backend.put_response(&response))
      .await
  }

  pub async fn get_response(&self, identity: &str) -> Result<Option<CachedApiResponse>> {
    let identity = identity.to_string();
    self
      .blocking(move |backend| backend.get_response(&identity))
      .await
  }

  /// Purge cached assets and responses outside the allow-list.
  pub async fn delete_generations_except(&self, keep: Vec<String>) -> Result<usize> {
    self
      .blocking(move |backend| backend.delete_generations_except(&keep))
      .await
  }

  /// Application version that last ran activation against this store.
  pub async fn activated_version(&self) -> Result<Option<String>> {
    self
      .blocking(|backend| backend.meta(ACTIVATED_VERSION_KEY))
      .await
  }

  pub async fn set_activated_version(&self, version: &str) -> Result<()> {
    let version = version.to_string();
    self
      .blocking(move |backend| backend.set_meta(ACTIVATED_VERSION_KEY, &version))
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::records::{Flashcard, SyncDescriptor, TestResult};
  use std::collections::BTreeMap;

  fn store() -> OfflineStore {
    OfflineStore::new(SqliteStorage::open_in_memory().unwrap())
  }

  fn card(id: i64, subject_id: i64) -> Flashcard {
    Flashcard {
      id,
      subject_id,
      front: format!("front {}", id),
      back: format!("back {}", id),
      last_sync: None,
    }
  }

  #[tokio::test]
  async fn test_upsert_many_stamps_last_sync() {
    let store = store();
    let written = store.upsert_many(vec![card(1, 5), card(2, 5)]).await.unwrap();
    assert!(written.iter().all(|c| c.last_sync.is_some()));

    let read: Vec<Flashcard> = store.get_all(RecordFilter::Index(5)).await.unwrap();
    assert_eq!(read, written);
  }

  #[tokio::test]
  async fn test_upsert_many_rejects_whole_batch_on_invalid_record() {
    let store = store();
    let mut bad = card(2, 5);
    bad.front.clear();

    let result = store.upsert_many(vec![card(1, 5), bad]).await;
    assert!(matches!(result, Err(OfflineError::InvalidRecord { .. })));
    assert_eq!(store.get_stats().await.unwrap().flashcards, 0);
  }

  #[tokio::test]
  async fn test_append_then_unsynced_query() {
    let store = store();
    let result = store
      .append(TestResult::new(9, 80, BTreeMap::new()))
      .await
      .unwrap();
    let id = result.id.unwrap();

    let unsynced: Vec<TestResult> = store.get_all(RecordFilter::Unsynced).await.unwrap();
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].id, Some(id));
    assert!(!unsynced[0].synced);

    store.mark_synced::<TestResult>(id).await.unwrap();
    let unsynced: Vec<TestResult> = store.get_all(RecordFilter::Unsynced).await.unwrap();
    assert!(unsynced.is_empty());
  }

  #[tokio::test]
  async fn test_mark_synced_twice_is_harmless() {
    let store = store();
    let result = store
      .append(TestResult::new(9, 80, BTreeMap::new()))
      .await
      .unwrap();
    let id = result.id.unwrap();

    store.mark_synced::<TestResult>(id).await.unwrap();
    let after_first: Vec<TestResult> = store.get_all(RecordFilter::All).await.unwrap();
    store.mark_synced::<TestResult>(id).await.unwrap();
    store.mark_synced::<TestResult>(id + 100).await.unwrap();
    let after_second: Vec<TestResult> = store.get_all(RecordFilter::All).await.unwrap();

    assert_eq!(after_first, after_second);
    assert!(after_second[0].synced);
  }

  #[tokio::test]
  async fn test_stats_count_pending_descriptors_only() {
    let store = store();
    let first = store
      .append(TestResult::new(9, 80, BTreeMap::new()))
      .await
      .unwrap();
    let second = store
      .append(TestResult::new(10, 60, BTreeMap::new()))
      .await
      .unwrap();
    for result in [&first, &second] {
      store
        .append(SyncDescriptor::for_result(result, result.id.unwrap()))
        .await
        .unwrap();
    }

    let stats = store.get_stats().await.unwrap();
    assert_eq!((stats.test_results, stats.sync_queue), (2, 2));

    store
      .mark_synced::<TestResult>(first.id.unwrap())
      .await
      .unwrap();
    let stats = store.get_stats().await.unwrap();
    assert_eq!((stats.test_results, stats.sync_queue), (1, 1));
  }

  #[tokio::test]
  async fn test_clear_all_zeroes_every_collection() {
    let store = store();
    store.upsert_many(vec![card(1, 5)]).await.unwrap();
    store
      .append(TestResult::new(9, 80, BTreeMap::new()))
      .await
      .unwrap();
    store
      .put_asset(CachedAsset {
        url: "https://study.example/app.css".to_string(),
        generation: "static-v1".to_string(),
        content_type: Some("text/css".to_string()),
        body: b"body{}".to_vec(),
        cached_at: Utc::now(),
      })
      .await
      .unwrap();

    store.clear_all().await.unwrap();
    assert!(store.get_stats().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_unavailable_store_refuses_append() {
    let store = OfflineStore::unavailable("no disk");
    assert!(!store.is_available());
    assert_eq!(store.unavailable_reason(), Some("no disk"));

    let result = store.append(TestResult::new(9, 80, BTreeMap::new())).await;
    assert!(matches!(result, Err(OfflineError::StorageInitFailure(_))));

    let cards: Vec<Flashcard> = store.get_all(RecordFilter::All).await.unwrap();
    assert!(cards.is_empty());
  }

  #[tokio::test]
  async fn test_activated_version_round_trip() {
    let store = store();
    assert_eq!(store.activated_version().await.unwrap(), None);
    store.set_activated_version("2.0.0").await.unwrap();
    assert_eq!(
      store.activated_version().await.unwrap().as_deref(),
      Some("2.0.0")
    );
  }
}
