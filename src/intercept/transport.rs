//! Network transport seam.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use super::request::{Request, Response, ResponseSource};
use crate::error::OfflineError;

/// Sends requests to the network.
///
/// Implementations return `NetworkUnavailable` when the host cannot be
/// reached. HTTP error statuses are ordinary responses.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &Request) -> std::result::Result<Response, OfflineError>;
}

/// Transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(connect_timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(connect_timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> std::result::Result<Response, OfflineError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| OfflineError::NetworkUnavailable(e.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| OfflineError::NetworkUnavailable(e.to_string()))?
      .to_vec();

    Ok(Response {
      status,
      content_type,
      body,
      source: ResponseSource::Network,
    })
  }
}
