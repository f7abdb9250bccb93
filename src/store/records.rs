//! Typed record schemas for the offline collections.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::OfflineError;

/// Record collections sharing the `records` table.
///
/// Cached assets and API responses have tables of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Flashcards,
  Tests,
  TestResults,
  SyncQueue,
}

impl Collection {
  pub fn name(self) -> &'static str {
    match self {
      Collection::Flashcards => "flashcards",
      Collection::Tests => "tests",
      Collection::TestResults => "test_results",
      Collection::SyncQueue => "sync_queue",
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A record stored in one of the generic collections.
///
/// Implementors name their collection and secondary index, and validate
/// themselves before every write.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  const COLLECTION: Collection;

  /// Primary key, `None` for an auto-keyed record that has not been appended yet.
  fn key(&self) -> Option<i64>;

  /// Secondary index value (subject id for snapshots, record id for descriptors).
  fn index_key(&self) -> Option<i64>;

  /// Sync flag for records that track delivery.
  fn synced(&self) -> Option<bool> {
    None
  }

  fn created_at(&self) -> Option<DateTime<Utc>> {
    None
  }

  fn validate(&self) -> Result<(), OfflineError>;
}

/// Snapshot of remote data, keyed by its remote id.
pub trait Snapshot: Record {
  fn last_sync(&self) -> Option<DateTime<Utc>>;

  fn stamp_last_sync(&mut self, at: DateTime<Utc>);
}

/// Locally originated record whose key is assigned by the store.
pub trait Appendable: Record {
  fn assign_key(&mut self, key: i64);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
  pub id: i64,
  pub subject_id: i64,
  pub front: String,
  pub back: String,
  #[serde(default)]
  pub last_sync: Option<DateTime<Utc>>,
}

impl Record for Flashcard {
  const COLLECTION: Collection = Collection::Flashcards;

  fn key(&self) -> Option<i64> {
    Some(self.id)
  }

  fn index_key(&self) -> Option<i64> {
    Some(self.subject_id)
  }

  fn validate(&self) -> Result<(), OfflineError> {
    let name = Self::COLLECTION.name();
    if self.id <= 0 {
      return Err(OfflineError::invalid(name, format!("id must be positive, got {}", self.id)));
    }
    if self.subject_id <= 0 {
      return Err(OfflineError::invalid(name, "subject id must be positive"));
    }
    if self.front.trim().is_empty() || self.back.trim().is_empty() {
      return Err(OfflineError::invalid(name, "front and back must not be empty"));
    }
    Ok(())
  }
}

impl Snapshot for Flashcard {
  fn last_sync(&self) -> Option<DateTime<Utc>> {
    self.last_sync
  }

  fn stamp_last_sync(&mut self, at: DateTime<Utc>) {
    self.last_sync = Some(at);
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  pub id: i64,
  pub prompt: String,
  #[serde(default)]
  pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
  pub id: i64,
  pub subject_id: i64,
  pub title: String,
  #[serde(default)]
  pub questions: Vec<Question>,
  #[serde(default)]
  pub last_sync: Option<DateTime<Utc>>,
}

impl Record for Test {
  const COLLECTION: Collection = Collection::Tests;

  fn key(&self) -> Option<i64> {
    Some(self.id)
  }

  fn index_key(&self) -> Option<i64> {
    Some(self.subject_id)
  }

  fn validate(&self) -> Result<(), OfflineError> {
    let name = Self::COLLECTION.name();
    if self.id <= 0 {
      return Err(OfflineError::invalid(name, format!("id must be positive, got {}", self.id)));
    }
    if self.subject_id <= 0 {
      return Err(OfflineError::invalid(name, "subject id must be positive"));
    }
    if self.title.trim().is_empty() {
      return Err(OfflineError::invalid(name, "title must not be empty"));
    }
    Ok(())
  }
}

impl Snapshot for Test {
  fn last_sync(&self) -> Option<DateTime<Utc>> {
    self.last_sync
  }

  fn stamp_last_sync(&mut self, at: DateTime<Utc>) {
    self.last_sync = Some(at);
  }
}

/// Result of a test taken on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
  #[serde(default)]
  pub id: Option<i64>,
  pub test_id: i64,
  /// Percentage score
  pub score: u32,
  #[serde(default)]
  pub answers: BTreeMap<i64, String>,
  pub synced: bool,
  pub created_at: DateTime<Utc>,
  /// Sent with every delivery attempt so the remote side can drop duplicates
  pub idempotency_key: Uuid,
}

impl TestResult {
  /// A fresh, unsynced result.
  pub fn new(test_id: i64, score: u32, answers: BTreeMap<i64, String>) -> Self {
    Self {
      id: None,
      test_id,
      score,
      answers,
      synced: false,
      created_at: Utc::now(),
      idempotency_key: Uuid::new_v4(),
    }
  }

  /// Body submitted to the remote API.
  pub fn payload(&self) -> serde_json::Value {
    serde_json::json!({
      "testId": self.test_id,
      "score": self.score,
      "answers": self.answers,
      "completedAt": self.created_at,
    })
  }
}

impl Record for TestResult {
  const COLLECTION: Collection = Collection::TestResults;

  fn key(&self) -> Option<i64> {
    self.id
  }

  fn index_key(&self) -> Option<i64> {
    Some(self.test_id)
  }

  fn synced(&self) -> Option<bool> {
    Some(self.synced)
  }

  fn created_at(&self) -> Option<DateTime<Utc>> {
    Some(self.created_at)
  }

  fn validate(&self) -> Result<(), OfflineError> {
    let name = Self::COLLECTION.name();
    if self.test_id <= 0 {
      return Err(OfflineError::invalid(name, "test id must be positive"));
    }
    if self.score > 100 {
      return Err(OfflineError::invalid(name, format!("score {} exceeds 100", self.score)));
    }
    if let Some(bad) = self.answers.keys().find(|k| **k <= 0) {
      return Err(OfflineError::invalid(name, format!("invalid question id {}", bad)));
    }
    Ok(())
  }
}

impl Appendable for TestResult {
  fn assign_key(&mut self, key: i64) {
    self.id = Some(key);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
  SubmitTestResult,
}

/// Pending outbound mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDescriptor {
  #[serde(default)]
  pub id: Option<i64>,
  pub kind: SyncKind,
  pub record_id: i64,
  pub payload: serde_json::Value,
  pub idempotency_key: Uuid,
  pub created_at: DateTime<Utc>,
}

impl SyncDescriptor {
  pub fn for_result(result: &TestResult, record_id: i64) -> Self {
    Self {
      id: None,
      kind: SyncKind::SubmitTestResult,
      record_id,
      payload: result.payload(),
      idempotency_key: result.idempotency_key,
      created_at: result.created_at,
    }
  }
}

impl Record for SyncDescriptor {
  const COLLECTION: Collection = Collection::SyncQueue;

  fn key(&self) -> Option<i64> {
    self.id
  }

  fn index_key(&self) -> Option<i64> {
    Some(self.record_id)
  }

  fn created_at(&self) -> Option<DateTime<Utc>> {
    Some(self.created_at)
  }

  fn validate(&self) -> Result<(), OfflineError> {
    let name = Self::COLLECTION.name();
    if self.record_id <= 0 {
      return Err(OfflineError::invalid(name, "record id must be positive"));
    }
    if !self.payload.is_object() {
      return Err(OfflineError::invalid(name, "payload must be a JSON object"));
    }
    Ok(())
  }
}

impl Appendable for SyncDescriptor {
  fn assign_key(&mut self, key: i64) {
    self.id = Some(key);
  }
}

/// Cached static resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAsset {
  pub url: String,
  pub generation: String,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

/// Last successful response for a request identity.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedApiResponse {
  pub identity: String,
  pub method: String,
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub generation: String,
  pub cached_at: DateTime<Utc>,
}

/// Per-collection counts for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
  pub static_assets: u64,
  pub api_responses: u64,
  pub flashcards: u64,
  pub tests: u64,
  /// Unsynced results only
  pub test_results: u64,
  /// Descriptors whose record is still unsynced
  pub sync_queue: u64,
}

impl StorageStats {
  pub fn is_empty(&self) -> bool {
    *self == StorageStats::default()
  }
}
