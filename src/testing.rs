//! Scripted transport for tests.

use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::OfflineError;
use crate::intercept::{Request, Response, ResponseSource, Transport};

/// Transport that answers from a route table and can be switched offline.
///
/// Unknown routes answer 404. Every call is recorded, including calls made
/// while offline.
pub struct MockTransport {
  routes: Mutex<HashMap<(Method, String), (u16, String)>>,
  online: AtomicBool,
  calls: Mutex<Vec<Request>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn respond(&self, method: Method, url: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, url.to_string()), (status, body.to_string()));
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_to(&self, method: Method, url: &str) -> Vec<Request> {
    self
      .calls()
      .into_iter()
      .filter(|r| r.method == method && r.url.as_str() == url)
      .collect()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn send(&self, request: &Request) -> Result<Response, OfflineError> {
    self.calls.lock().unwrap().push(request.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(OfflineError::NetworkUnavailable(
        "mock transport offline".to_string(),
      ));
    }

    let route = self
      .routes
      .lock()
      .unwrap()
      .get(&(request.method.clone(), request.url.to_string()))
      .cloned();
    let (status, body) = route.unwrap_or((404, String::new()));
    let content_type = if body.trim_start().starts_with(['{', '[']) {
      "application/json"
    } else {
      "text/plain"
    };

    Ok(Response {
      status,
      content_type: Some(content_type.to_string()),
      body: body.into_bytes(),
      source: ResponseSource::Network,
    })
  }
}
