//! Request and response types seen by the interceptor.

use reqwest::Method;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use url::Url;

use crate::store::{CachedApiResponse, CachedAsset};

/// What the request will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  /// A navigable page
  Document,
  Script,
  Style,
  Image,
  Font,
  /// Fetch/XHR and anything else
  Other,
}

const STATIC_EXTENSIONS: &[(&str, Destination)] = &[
  ("js", Destination::Script),
  ("mjs", Destination::Script),
  ("css", Destination::Style),
  ("png", Destination::Image),
  ("jpg", Destination::Image),
  ("jpeg", Destination::Image),
  ("gif", Destination::Image),
  ("svg", Destination::Image),
  ("webp", Destination::Image),
  ("ico", Destination::Image),
  ("woff", Destination::Font),
  ("woff2", Destination::Font),
  ("ttf", Destination::Font),
  ("otf", Destination::Font),
];

impl Destination {
  /// Guess the destination of a resource from its path extension.
  pub fn from_path(url: &Url) -> Self {
    let ext = url
      .path_segments()
      .and_then(|mut segments| segments.next_back())
      .and_then(|last| last.rsplit_once('.'))
      .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext {
      Some(ext) => STATIC_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, d)| *d)
        .unwrap_or(Destination::Other),
      None => Destination::Other,
    }
  }

  pub fn is_static(self) -> bool {
    matches!(
      self,
      Destination::Script | Destination::Style | Destination::Image | Destination::Font
    )
  }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// GET with the destination inferred from the path.
  pub fn get(url: Url) -> Self {
    let destination = Destination::from_path(&url);
    Self {
      method: Method::GET,
      url,
      destination,
      headers: Vec::new(),
      body: None,
    }
  }

  /// GET for a navigable document.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  /// POST with a JSON body.
  pub fn post_json(url: Url, body: &serde_json::Value) -> Self {
    Self {
      method: Method::POST,
      url,
      destination: Destination::Other,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body.to_string().into_bytes()),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// URL without its fragment, as used for cache lookups.
  pub fn cache_url(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }

  /// Stable identity of method + URL for the response cache.
  pub fn identity(&self) -> String {
    let input = format!("{} {}", self.method.as_str().to_ascii_uppercase(), self.cache_url());

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Served from the offline store
  Cache,
  /// The preloaded offline page
  OfflineFallback,
  /// Generated locally because nothing else was available
  Synthetic,
  /// Not intercepted
  Passthrough,
}

#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

pub const OFFLINE_MESSAGE: &str = "You are offline. Please check your connection.";

impl Response {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// True when the response did not come from the network.
  pub fn is_offline(&self) -> bool {
    matches!(
      self.source,
      ResponseSource::Cache | ResponseSource::OfflineFallback | ResponseSource::Synthetic
    )
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// JSON error body returned for API requests that could not be served.
  pub fn offline_json() -> Self {
    let body = serde_json::json!({
      "error": "offline",
      "message": OFFLINE_MESSAGE,
    });
    Self {
      status: 503,
      content_type: Some("application/json".to_string()),
      body: body.to_string().into_bytes(),
      source: ResponseSource::Synthetic,
    }
  }

  /// Bare failure for static assets that are neither cached nor reachable.
  pub fn offline_failure() -> Self {
    Self {
      status: 503,
      content_type: Some("text/plain".to_string()),
      body: b"Offline".to_vec(),
      source: ResponseSource::Synthetic,
    }
  }

  pub fn offline_document(html: &str) -> Self {
    Self {
      status: 200,
      content_type: Some("text/html; charset=utf-8".to_string()),
      body: html.as_bytes().to_vec(),
      source: ResponseSource::OfflineFallback,
    }
  }
}

impl From<CachedAsset> for Response {
  fn from(asset: CachedAsset) -> Self {
    Self {
      status: 200,
      content_type: asset.content_type,
      body: asset.body,
      source: ResponseSource::Cache,
    }
  }
}

impl From<CachedApiResponse> for Response {
  fn from(cached: CachedApiResponse) -> Self {
    Self {
      status: cached.status,
      content_type: cached.content_type,
      body: cached.body,
      source: ResponseSource::Cache,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_destination_from_extension() {
    assert_eq!(
      Destination::from_path(&url("https://study.example/static/app.JS")),
      Destination::Script
    );
    assert_eq!(
      Destination::from_path(&url("https://study.example/fonts/inter.woff2?v=3")),
      Destination::Font
    );
    assert_eq!(
      Destination::from_path(&url("https://study.example/api/subjects/5")),
      Destination::Other
    );
    assert_eq!(
      Destination::from_path(&url("https://study.example/")),
      Destination::Other
    );
  }

  #[test]
  fn test_identity_ignores_fragment_but_not_method() {
    let a = Request::get(url("https://study.example/api/cards?subject=5#top"));
    let b = Request::get(url("https://study.example/api/cards?subject=5"));
    let c = Request::post_json(url("https://study.example/api/cards?subject=5"), &serde_json::json!({}));

    assert_eq!(a.identity(), b.identity());
    assert_ne!(a.identity(), c.identity());
    assert_eq!(a.identity().len(), 64);
  }

  #[test]
  fn test_offline_json_body() {
    let response = Response::offline_json();
    assert_eq!(response.status, 503);
    assert!(response.is_offline());
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["message"], OFFLINE_MESSAGE);
  }
}
