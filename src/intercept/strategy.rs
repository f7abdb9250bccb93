//! Request classification.

use reqwest::Method;
use url::{Host, Origin, Url};

use super::request::{Destination, Request};

/// Caching policy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve the cached copy; fetch and store only on a miss
  CacheFirst,
  /// Try the network; fall back to the cached copy, then to an offline response
  NetworkFirst,
  /// Not intercepted
  Bypass,
}

/// Hosts that always count as a development environment.
const DEV_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Decides which strategy applies to each request.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Origin,
  api_prefix: String,
  dev_mode: bool,
}

impl Classifier {
  pub fn new(app_origin: &Url, api_prefix: &str, extra_dev_hosts: &[String]) -> Self {
    let dev_mode = app_origin
      .host()
      .map(|host| is_dev_host(&host, extra_dev_hosts))
      .unwrap_or(false);

    Self {
      origin: app_origin.origin(),
      api_prefix: api_prefix.to_string(),
      dev_mode,
    }
  }

  /// Whether interception is disabled for this environment.
  pub fn is_dev_mode(&self) -> bool {
    self.dev_mode
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    if self.dev_mode {
      return Strategy::Bypass;
    }
    if request.url.origin() != self.origin {
      return Strategy::Bypass;
    }
    if request.method != Method::GET {
      return Strategy::Bypass;
    }

    if self.is_api(request) {
      return Strategy::NetworkFirst;
    }

    let destination = match request.destination {
      Destination::Other => Destination::from_path(&request.url),
      d => d,
    };
    if destination.is_static() {
      return Strategy::CacheFirst;
    }

    // Documents and every other same-origin GET
    Strategy::NetworkFirst
  }

  /// Whether the request targets the remote API.
  pub fn is_api(&self, request: &Request) -> bool {
    request.url.path().starts_with(&self.api_prefix)
  }
}

fn is_dev_host(host: &Host<&str>, extra: &[String]) -> bool {
  let name = match host {
    Host::Domain(d) => d.to_string(),
    Host::Ipv4(ip) => ip.to_string(),
    Host::Ipv6(ip) => ip.to_string(),
  };
  DEV_HOSTS.contains(&name.as_str()) || extra.iter().any(|h| h.eq_ignore_ascii_case(&name))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    Classifier::new(
      &Url::parse("https://study.example").unwrap(),
      "/api/",
      &[],
    )
  }

  fn get(s: &str) -> Request {
    Request::get(Url::parse(s).unwrap())
  }

  #[test]
  fn test_static_assets_are_cache_first() {
    let c = classifier();
    for url in [
      "https://study.example/static/app.js",
      "https://study.example/static/site.css",
      "https://study.example/img/logo.svg",
      "https://study.example/fonts/inter.woff2",
    ] {
      assert_eq!(c.classify(&get(url)), Strategy::CacheFirst, "{}", url);
    }
  }

  #[test]
  fn test_api_and_documents_are_network_first() {
    let c = classifier();
    let api = get("https://study.example/api/subjects/5/flashcards");
    assert!(c.is_api(&api));
    assert_eq!(c.classify(&api), Strategy::NetworkFirst);

    // API paths win over a static-looking extension
    assert_eq!(
      c.classify(&get("https://study.example/api/users/3/avatar.png")),
      Strategy::NetworkFirst
    );

    let page = Request::navigate(Url::parse("https://study.example/subjects/5").unwrap());
    assert!(!c.is_api(&page));
    assert_eq!(c.classify(&page), Strategy::NetworkFirst);
  }

  #[test]
  fn test_cross_origin_is_never_intercepted() {
    let c = classifier();
    assert_eq!(
      c.classify(&get("https://cdn.other.example/lib.js")),
      Strategy::Bypass
    );
    // Different port is a different origin
    assert_eq!(
      c.classify(&get("https://study.example:8443/app.js")),
      Strategy::Bypass
    );
  }

  #[test]
  fn test_mutations_bypass() {
    let c = classifier();
    let post = Request::post_json(
      Url::parse("https://study.example/api/test-results").unwrap(),
      &serde_json::json!({}),
    );
    assert_eq!(c.classify(&post), Strategy::Bypass);
  }

  #[test]
  fn test_dev_host_disables_interception() {
    let local = Classifier::new(&Url::parse("http://localhost:3000").unwrap(), "/api/", &[]);
    assert!(local.is_dev_mode());
    assert_eq!(
      local.classify(&get("http://localhost:3000/static/app.js")),
      Strategy::Bypass
    );

    let loopback = Classifier::new(&Url::parse("http://127.0.0.1:8000").unwrap(), "/api/", &[]);
    assert!(loopback.is_dev_mode());

    let custom = Classifier::new(
      &Url::parse("http://devbox.lan").unwrap(),
      "/api/",
      &["DEVBOX.lan".to_string()],
    );
    assert!(custom.is_dev_mode());
    assert!(!classifier().is_dev_mode());
  }
}
