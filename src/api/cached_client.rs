//! Study client that keeps subject content available offline.

use chrono::{DateTime, Utc};
use std::future::Future;
use tracing::{info, warn};

use super::client::StudyClient;
use crate::error::OfflineError;
use crate::store::{Flashcard, OfflineStore, RecordFilter, Snapshot, Test};

type Result<T> = std::result::Result<T, OfflineError>;

/// Where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Offline mode - network unavailable, serving stored data
  Offline,
}

/// Data plus metadata about its source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Oldest `last_sync` among stored records, when served offline
  pub synced_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      synced_at: None,
    }
  }

  pub fn offline(data: T, synced_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      synced_at,
    }
  }
}

/// Counts written by [`CachedStudyClient::prepare_subject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedSubject {
  pub flashcards: usize,
  pub tests: usize,
}

/// Study client with transparent offline fallback for subject content.
///
/// Reads go to the network first and refresh the store on success; when the
/// network is unavailable the last stored snapshot is served instead.
#[derive(Clone)]
pub struct CachedStudyClient {
  inner: StudyClient,
  store: OfflineStore,
}

impl CachedStudyClient {
  pub fn new(inner: StudyClient, store: OfflineStore) -> Self {
    Self { inner, store }
  }

  /// Fetch a subject's flashcards and tests and store them for offline use.
  pub async fn prepare_subject(&self, subject_id: i64) -> Result<PreparedSubject> {
    let (cards, tests) = futures::try_join!(
      self.inner.get_flashcards(subject_id),
      self.inner.get_tests(subject_id)
    )?;

    let cards = self.store.upsert_many(cards).await?;
    let tests = self.store.upsert_many(tests).await?;
    info!(
      subject_id,
      flashcards = cards.len(),
      tests = tests.len(),
      "prepared subject for offline use"
    );

    Ok(PreparedSubject {
      flashcards: cards.len(),
      tests: tests.len(),
    })
  }

  /// Flashcards of a subject, from the network or the offline store.
  pub async fn flashcards(&self, subject_id: i64) -> Result<CacheResult<Vec<Flashcard>>> {
    self
      .fetch_subject(subject_id, || self.inner.get_flashcards(subject_id))
      .await
  }

  /// Tests of a subject, from the network or the offline store.
  pub async fn tests(&self, subject_id: i64) -> Result<CacheResult<Vec<Test>>> {
    self
      .fetch_subject(subject_id, || self.inner.get_tests(subject_id))
      .await
  }

  /// Network-first read of one subject's snapshots.
  ///
  /// 1. Fetch from network; on success refresh the store and return
  /// 2. On network failure, return what the store holds for the subject
  /// 3. Nothing stored either: `CacheMiss`
  async fn fetch_subject<T, F, Fut>(&self, subject_id: i64, fetcher: F) -> Result<CacheResult<Vec<T>>>
  where
    T: Snapshot,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    match fetcher().await {
      Ok(fresh) => {
        // Only subjects prepared for offline use are refreshed
        if !self.is_prepared(subject_id).await {
          return Ok(CacheResult::from_network(fresh));
        }

        match self.store.upsert_many(fresh.clone()).await {
          Ok(stored) => Ok(CacheResult::from_network(stored)),
          Err(e) => {
            warn!(subject_id, "could not refresh offline {}: {}", T::COLLECTION, e);
            Ok(CacheResult::from_network(fresh))
          }
        }
      }
      Err(e) if falls_back(&e) => {
        let stored = self
          .store
          .get_all::<T>(RecordFilter::Index(subject_id))
          .await?;
        if stored.is_empty() {
          return Err(OfflineError::CacheMiss(format!(
            "{} of subject {}",
            T::COLLECTION,
            subject_id
          )));
        }
        let synced_at = stored.iter().filter_map(Snapshot::last_sync).min();
        Ok(CacheResult::offline(stored, synced_at))
      }
      Err(e) => Err(e),
    }
  }

  /// A subject counts as prepared when either of its collections is stored.
  async fn is_prepared(&self, subject_id: i64) -> bool {
    let filter = RecordFilter::Index(subject_id);
    let (cards, tests) = futures::join!(
      self.store.get_all::<Flashcard>(filter),
      self.store.get_all::<Test>(filter)
    );
    matches!(cards, Ok(c) if !c.is_empty()) || matches!(tests, Ok(t) if !t.is_empty())
  }
}

/// Errors after which stored data is served instead.
fn falls_back(error: &OfflineError) -> bool {
  match error {
    OfflineError::NetworkUnavailable(_) => true,
    OfflineError::UnexpectedStatus { status, .. } => *status >= 500,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStorage;
  use crate::testing::MockTransport;
  use reqwest::Method;
  use std::sync::Arc;
  use url::Url;

  const CARDS: &str = "https://study.example/api/subjects/5/flashcards/";
  const TESTS: &str = "https://study.example/api/subjects/5/tests/";

  fn setup() -> (Arc<MockTransport>, OfflineStore, CachedStudyClient) {
    let transport = Arc::new(MockTransport::new());
    transport.respond(
      Method::GET,
      CARDS,
      200,
      r#"[{"id":1,"subject":5,"front":"ATP","back":"energy"},{"id":2,"subject":5,"front":"DNA","back":"genes"}]"#,
    );
    transport.respond(
      Method::GET,
      TESTS,
      200,
      r#"[{"id":9,"subject":5,"title":"Cells quiz"}]"#,
    );

    let store = OfflineStore::new(SqliteStorage::open_in_memory().unwrap());
    let inner = StudyClient::new(
      transport.clone(),
      Url::parse("https://study.example/api/").unwrap(),
      None,
    );
    let client = CachedStudyClient::new(inner, store.clone());
    (transport, store, client)
  }

  #[tokio::test]
  async fn test_prepare_then_read_offline_from_store() {
    let (transport, store, client) = setup();

    let prepared = client.prepare_subject(5).await.unwrap();
    assert_eq!(prepared, PreparedSubject { flashcards: 2, tests: 1 });

    let stored: Vec<Flashcard> = store.get_all(RecordFilter::Index(5)).await.unwrap();
    assert_eq!(stored.len(), 2);

    transport.set_online(false);
    let offline = client.flashcards(5).await.unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data, stored);
    assert!(offline.synced_at.is_some());

    let tests = client.tests(5).await.unwrap();
    assert_eq!(tests.source, CacheSource::Offline);
    assert_eq!(tests.data[0].title, "Cells quiz");
  }

  #[tokio::test]
  async fn test_unprepared_subject_offline_is_cache_miss() {
    let (transport, _store, client) = setup();
    transport.set_online(false);

    let result = client.flashcards(5).await;
    assert!(matches!(result, Err(OfflineError::CacheMiss(_))));
  }

  #[tokio::test]
  async fn test_online_visit_refreshes_prepared_subject_only() {
    let (transport, store, client) = setup();

    // Not prepared: reading online stores nothing
    client.flashcards(5).await.unwrap();
    assert_eq!(store.get_stats().await.unwrap().flashcards, 0);

    client.prepare_subject(5).await.unwrap();
    transport.respond(
      Method::GET,
      CARDS,
      200,
      r#"[{"id":1,"subject":5,"front":"ATP","back":"adenosine triphosphate"}]"#,
    );
    let online = client.flashcards(5).await.unwrap();
    assert_eq!(online.source, CacheSource::Network);

    let stored: Vec<Flashcard> = store.get_all(RecordFilter::Index(5)).await.unwrap();
    let card = stored.iter().find(|c| c.id == 1).unwrap();
    assert_eq!(card.back, "adenosine triphosphate");
  }

  #[tokio::test]
  async fn test_subject_prepared_without_tests_picks_them_up_later() {
    let (transport, store, client) = setup();
    transport.respond(Method::GET, TESTS, 200, "[]");

    let prepared = client.prepare_subject(5).await.unwrap();
    assert_eq!(prepared, PreparedSubject { flashcards: 2, tests: 0 });

    // The first test appears after preparation
    transport.respond(
      Method::GET,
      TESTS,
      200,
      r#"[{"id":9,"subject":5,"title":"Cells quiz"}]"#,
    );
    client.tests(5).await.unwrap();
    assert_eq!(store.get_stats().await.unwrap().tests, 1);

    transport.set_online(false);
    let offline = client.tests(5).await.unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data[0].id, 9);
  }

  #[tokio::test]
  async fn test_prepare_fails_offline_without_writing() {
    let (transport, store, client) = setup();
    transport.set_online(false);

    assert!(matches!(
      client.prepare_subject(5).await,
      Err(OfflineError::NetworkUnavailable(_))
    ));
    assert!(store.get_stats().await.unwrap().is_empty());
  }

  #[test]
  fn test_fallback_errors() {
    assert!(falls_back(&OfflineError::NetworkUnavailable("x".into())));
    assert!(falls_back(&OfflineError::UnexpectedStatus {
      status: 502,
      url: String::new()
    }));
    assert!(!falls_back(&OfflineError::UnexpectedStatus {
      status: 403,
      url: String::new()
    }));
  }
}
