//! Cache strategy engine.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::request::{Destination, Request, Response, ResponseSource};
use super::strategy::{Classifier, Strategy};
use super::transport::Transport;
use crate::store::{CachedApiResponse, CachedAsset, OfflineStore};

/// Names of the cache generations the running version writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGenerations {
  pub static_assets: String,
  pub api_responses: String,
}

impl CacheGenerations {
  /// Generations kept on activation.
  pub fn allow_list(&self) -> Vec<String> {
    vec![self.static_assets.clone(), self.api_responses.clone()]
  }
}

/// Intercepts outgoing requests and serves them according to their strategy.
///
/// `handle` always resolves to a response: network failures turn into cached
/// copies, the offline page or a synthetic 503.
#[derive(Clone)]
pub struct Interceptor {
  transport: Arc<dyn Transport>,
  store: OfflineStore,
  classifier: Classifier,
  generations: CacheGenerations,
  offline_page: Arc<str>,
}

impl Interceptor {
  pub fn new(
    transport: Arc<dyn Transport>,
    store: OfflineStore,
    classifier: Classifier,
    generations: CacheGenerations,
    offline_page: &str,
  ) -> Self {
    Self {
      transport,
      store,
      classifier,
      generations,
      offline_page: Arc::from(offline_page),
    }
  }

  pub fn classifier(&self) -> &Classifier {
    &self.classifier
  }

  /// Serve a request.
  pub async fn handle(&self, request: Request) -> Response {
    let strategy = self.classifier.classify(&request);
    debug!(method = %request.method, url = %request.url, ?strategy, "intercepted request");

    match strategy {
      Strategy::CacheFirst => self.cache_first(&request).await,
      Strategy::NetworkFirst => self.network_first(&request).await,
      Strategy::Bypass => self.pass_through(&request).await,
    }
  }

  async fn cache_first(&self, request: &Request) -> Response {
    let url = request.cache_url();

    match self
      .store
      .get_asset(&self.generations.static_assets, &url)
      .await
    {
      Ok(Some(asset)) => {
        debug!(%url, "static cache hit");
        return asset.into();
      }
      Ok(None) => debug!(%url, "static cache miss"),
      Err(e) => debug!(%url, "static cache unreadable: {}", e),
    }

    match self.transport.send(request).await {
      Ok(response) => {
        if response.is_success() {
          let asset = CachedAsset {
            url,
            generation: self.generations.static_assets.clone(),
            content_type: response.content_type.clone(),
            body: response.body.clone(),
            cached_at: Utc::now(),
          };
          if let Err(e) = self.store.put_asset(asset).await {
            debug!("not caching static asset: {}", e);
          }
        }
        response
      }
      Err(e) => {
        debug!(%url, "static asset unavailable: {}", e);
        Response::offline_failure()
      }
    }
  }

  async fn network_first(&self, request: &Request) -> Response {
    let identity = request.identity();

    match self.transport.send(request).await {
      Ok(response) => {
        if response.is_success() {
          let cached = CachedApiResponse {
            identity,
            method: request.method.to_string(),
            url: request.cache_url(),
            status: response.status,
            content_type: response.content_type.clone(),
            body: response.body.clone(),
            generation: self.generations.api_responses.clone(),
            cached_at: Utc::now(),
          };
          if let Err(e) = self.store.put_response(cached).await {
            debug!("not caching response: {}", e);
          }
        }
        return response;
      }
      Err(e) => debug!(url = %request.url, "network failed, trying cache: {}", e),
    }

    match self.store.get_response(&identity).await {
      Ok(Some(cached)) => return cached.into(),
      Ok(None) => {}
      Err(e) => debug!("response cache unreadable: {}", e),
    }

    // Precached app shell documents live in the static cache
    match self
      .store
      .get_asset(&self.generations.static_assets, &request.cache_url())
      .await
    {
      Ok(Some(asset)) => return asset.into(),
      Ok(None) => {}
      Err(e) => debug!("static cache unreadable: {}", e),
    }

    if request.destination == Destination::Document {
      Response::offline_document(&self.offline_page)
    } else {
      Response::offline_json()
    }
  }

  async fn pass_through(&self, request: &Request) -> Response {
    match self.transport.send(request).await {
      Ok(mut response) => {
        response.source = ResponseSource::Passthrough;
        response
      }
      Err(e) => {
        debug!(url = %request.url, "pass-through request failed: {}", e);
        Response::offline_json()
      }
    }
  }

  /// Delete every cache generation outside the allow-list.
  ///
  /// Returns the number of evicted entries.
  pub async fn activate(&self) -> usize {
    match self
      .store
      .delete_generations_except(self.generations.allow_list())
      .await
    {
      Ok(evicted) => {
        info!(evicted, "activated cache generations {:?}", self.generations.allow_list());
        evicted
      }
      Err(e) => {
        warn!("cache activation failed: {}", e);
        0
      }
    }
  }

  /// Fetch the app shell into the static cache.
  ///
  /// Returns how many URLs are now available offline.
  pub async fn precache(&self, urls: &[Url]) -> usize {
    let requests = urls.iter().map(|url| {
      let request = Request::get(url.clone());
      async move { self.cache_first(&request).await }
    });
    let results = join_all(requests).await;

    let cached = results.iter().filter(|r| r.is_success()).count();
    if cached < urls.len() {
      warn!(cached, total = urls.len(), "precache incomplete");
    }
    cached
  }
}
