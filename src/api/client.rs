use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

use super::types::{ApiFlashcard, ApiList, ApiTest, ApiVersion};
use crate::error::OfflineError;
use crate::intercept::{Request, Transport};
use crate::store::{Flashcard, Test, TestResult};

type Result<T> = std::result::Result<T, OfflineError>;

/// Remote study API client
#[derive(Clone)]
pub struct StudyClient {
  transport: Arc<dyn Transport>,
  base: Url,
  token: Option<String>,
}

impl StudyClient {
  /// `base` is the API root, e.g. `https://study.example/api/`.
  pub fn new(transport: Arc<dyn Transport>, base: Url, token: Option<String>) -> Self {
    Self {
      transport,
      base,
      token,
    }
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path)
      .map_err(|e| OfflineError::NetworkUnavailable(format!("invalid endpoint {}: {}", path, e)))
  }

  fn authorize(&self, request: Request) -> Request {
    match &self.token {
      Some(token) => request.with_header("Authorization", &format!("Bearer {}", token)),
      None => request,
    }
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let url = self.endpoint(path)?;
    let request = self.authorize(Request::get(url.clone()));
    let response = self.transport.send(&request).await?;

    if !response.is_success() {
      return Err(OfflineError::UnexpectedStatus {
        status: response.status,
        url: url.to_string(),
      });
    }
    Ok(response.json()?)
  }

  /// Get all flashcards of a subject
  pub async fn get_flashcards(&self, subject_id: i64) -> Result<Vec<Flashcard>> {
    let cards: ApiList<ApiFlashcard> = self
      .get_json(&format!("subjects/{}/flashcards/", subject_id))
      .await?;
    Ok(cards.into_vec().into_iter().map(Flashcard::from).collect())
  }

  /// Get all tests of a subject
  pub async fn get_tests(&self, subject_id: i64) -> Result<Vec<Test>> {
    let tests: ApiList<ApiTest> = self
      .get_json(&format!("subjects/{}/tests/", subject_id))
      .await?;
    Ok(tests.into_vec().into_iter().map(Test::from).collect())
  }

  /// Submit a test result taken on this device.
  ///
  /// The result's idempotency key goes along so a retried delivery can be
  /// recognised by the server.
  pub async fn submit_test_result(&self, result: &TestResult) -> Result<()> {
    let record_id = result.id.unwrap_or_default();
    let url = self.endpoint("test-results/")?;
    let request = self.authorize(
      Request::post_json(url, &result.payload())
        .with_header("Idempotency-Key", &result.idempotency_key.to_string()),
    );

    let response =
      self
        .transport
        .send(&request)
        .await
        .map_err(|e| OfflineError::SyncDeliveryFailure {
          record_id,
          reason: e.to_string(),
        })?;

    if !response.is_success() {
      return Err(OfflineError::SyncDeliveryFailure {
        record_id,
        reason: format!("HTTP {}: {}", response.status, response.text()),
      });
    }
    Ok(())
  }

  /// Latest application version published by the server
  pub async fn latest_version(&self) -> Result<String> {
    let manifest: ApiVersion = self.get_json("version/").await?;
    Ok(manifest.version)
  }

  /// Whether the API answers at all.
  pub async fn is_reachable(&self) -> bool {
    let Ok(url) = self.endpoint("health/") else {
      return false;
    };
    self.transport.send(&Request::get(url)).await.is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MockTransport;
  use reqwest::Method;
  use std::collections::BTreeMap;

  const BASE: &str = "https://study.example/api/";

  fn client(transport: Arc<MockTransport>, token: Option<&str>) -> StudyClient {
    StudyClient::new(
      transport,
      Url::parse(BASE).unwrap(),
      token.map(String::from),
    )
  }

  #[tokio::test]
  async fn test_get_flashcards_attaches_token() {
    let transport = Arc::new(MockTransport::new());
    transport.respond(
      Method::GET,
      "https://study.example/api/subjects/5/flashcards/",
      200,
      r#"[{"id":1,"subject":5,"front":"Q","back":"A"}]"#,
    );

    let cards = client(transport.clone(), Some("t0k"))
      .get_flashcards(5)
      .await
      .unwrap();
    assert_eq!(cards.len(), 1);

    let call = &transport.calls()[0];
    assert!(call
      .headers
      .contains(&("Authorization".to_string(), "Bearer t0k".to_string())));
  }

  #[tokio::test]
  async fn test_non_success_status_is_an_error() {
    let transport = Arc::new(MockTransport::new());
    let result = client(transport, None).get_tests(5).await;
    assert!(matches!(
      result,
      Err(OfflineError::UnexpectedStatus { status: 404, .. })
    ));
  }

  #[tokio::test]
  async fn test_submit_sends_idempotency_key() {
    let transport = Arc::new(MockTransport::new());
    transport.respond(Method::POST, "https://study.example/api/test-results/", 201, "{}");

    let mut result = TestResult::new(9, 80, BTreeMap::new());
    result.id = Some(1);
    client(transport.clone(), None)
      .submit_test_result(&result)
      .await
      .unwrap();

    let call = &transport.calls()[0];
    assert!(call.headers.contains(&(
      "Idempotency-Key".to_string(),
      result.idempotency_key.to_string()
    )));
    let body: serde_json::Value = serde_json::from_slice(call.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["testId"], 9);
    assert_eq!(body["score"], 80);
  }

  #[tokio::test]
  async fn test_submit_failure_is_delivery_failure() {
    let transport = Arc::new(MockTransport::new());
    transport.set_online(false);

    let mut result = TestResult::new(9, 80, BTreeMap::new());
    result.id = Some(4);
    let err = client(transport, None)
      .submit_test_result(&result)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      OfflineError::SyncDeliveryFailure { record_id: 4, .. }
    ));
  }

  #[tokio::test]
  async fn test_latest_version_and_reachability() {
    let transport = Arc::new(MockTransport::new());
    transport.respond(
      Method::GET,
      "https://study.example/api/version/",
      200,
      r#"{"version":"1.4.0"}"#,
    );

    let api = client(transport.clone(), None);
    assert_eq!(api.latest_version().await.unwrap(), "1.4.0");
    assert!(api.is_reachable().await);

    transport.set_online(false);
    assert!(!api.is_reachable().await);
  }
}
