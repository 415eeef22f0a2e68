//! Request and response values passed between the worker, the store and the network.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// An intercepted resource request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A GET request for an absolute URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
    }
  }

  /// Build a request, resolving `target` against `base` when it is relative.
  pub fn resolve(method: &str, target: &str, base: &Url) -> Result<Self> {
    let url = base
      .join(target)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", target, e))?;

    Ok(Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Vec::new(),
    })
  }

  /// Identity used for cache lookups.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Request identity: method plus URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);

    Self {
      method: method.to_ascii_uppercase(),
      url: url.into(),
    }
  }

  /// Only GET requests are ever answered from a store.
  pub fn is_cacheable(&self) -> bool {
    self.method == "GET"
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A response body with its status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL after redirects
  pub url: Url,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Whether the status is in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
