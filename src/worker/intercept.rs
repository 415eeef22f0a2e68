//! Cache-first request interception.

use color_eyre::Result;
use tracing::{debug, warn};

use super::OfflineWorker;
use crate::cache::{CacheStorage, CachedEntry};
use crate::http::{Request, Response};
use crate::network::Fetcher;

/// How an intercepted request was answered.
#[derive(Debug)]
pub enum Interception {
  /// Not intercepted; the runtime handles the request itself
  Passthrough,
  /// Answered from a store without touching the network
  Cache(CachedEntry),
  /// Store miss; the network result, success or failure, as-is
  Network(Result<Response>),
}

impl Interception {
  /// Short label for where the answer came from.
  pub fn source(&self) -> &'static str {
    match self {
      Interception::Passthrough => "passthrough",
      Interception::Cache(_) => "cache",
      Interception::Network(_) => "network",
    }
  }

  /// The response handed back to the page, if the worker produced one.
  pub fn into_response(self) -> Option<Result<Response>> {
    match self {
      Interception::Passthrough => None,
      Interception::Cache(entry) => Some(Ok(entry.response)),
      Interception::Network(result) => Some(result),
    }
  }
}

impl<S: CacheStorage, F: Fetcher> OfflineWorker<S, F> {
  /// Answer a request: bypass, stored response, or exactly one network fetch.
  ///
  /// Stored entries are served regardless of age. Network responses are never written
  /// back to the store.
  pub async fn handle_fetch(&self, request: &Request) -> Interception {
    if self.is_bypassed(request) {
      debug!(url = %request.url, "Bypassing request");
      return Interception::Passthrough;
    }

    let key = request.key();
    match self.storage.match_any(&key) {
      Ok(Some(entry)) => {
        debug!(request = %key, cache = %entry.cache_name, "Serving from cache");
        return Interception::Cache(entry);
      }
      Ok(None) => {}
      Err(e) => warn!(request = %key, error = %e, "Cache lookup failed"),
    }

    debug!(request = %key, "Fetching from network");
    Interception::Network(self.fetcher.fetch(request).await)
  }

  /// Prefixes match without regard to ASCII case, since parsed URLs carry a lowercased
  /// scheme and host.
  fn is_bypassed(&self, request: &Request) -> bool {
    let url = request.url.as_str();
    self
      .settings
      .bypass_prefixes
      .iter()
      .any(|prefix| starts_with_ignore_case(url, prefix))
  }
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
  s.get(..prefix.len())
    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[cfg(test)]
mod tests {
  use url::Url;

  use super::*;
  use crate::cache::SqliteStorage;
  use crate::http::RequestKey;
  use crate::worker::testing::{settings, InstrumentedStorage, ScriptedFetcher};

  async fn installed_worker(
    fetcher: ScriptedFetcher,
  ) -> OfflineWorker<SqliteStorage, ScriptedFetcher> {
    let fetcher = fetcher.respond("http://localhost/index.html", 200, "<html>");
    let worker = OfflineWorker::new(
      SqliteStorage::open_in_memory().unwrap(),
      fetcher,
      settings("v1", &["/index.html"]),
    );
    worker.install().await.unwrap();
    worker
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_hit_is_served_without_network() {
    let worker = installed_worker(ScriptedFetcher::new()).await;
    let before = worker.fetcher.calls();

    let outcome = worker.handle_fetch(&get("http://localhost/index.html")).await;

    assert_eq!(outcome.source(), "cache");
    let resp = outcome.into_response().unwrap().unwrap();
    assert_eq!(resp.body, b"<html>");
    assert_eq!(worker.fetcher.calls(), before);
  }

  #[tokio::test]
  async fn test_hit_ignores_fragment() {
    let worker = installed_worker(ScriptedFetcher::new()).await;
    let before = worker.fetcher.calls();

    let outcome = worker
      .handle_fetch(&get("http://localhost/index.html#scene"))
      .await;

    assert!(matches!(outcome, Interception::Cache(_)));
    assert_eq!(worker.fetcher.calls(), before);
  }

  #[tokio::test]
  async fn test_miss_fetches_once_and_does_not_refill() {
    let worker =
      installed_worker(ScriptedFetcher::new().respond("http://localhost/unlisted.png", 200, "png"))
        .await;
    let before = worker.fetcher.calls();

    let outcome = worker.handle_fetch(&get("http://localhost/unlisted.png")).await;
    let resp = outcome.into_response().unwrap().unwrap();
    assert_eq!(resp.body, b"png");
    assert_eq!(worker.fetcher.calls(), before + 1);

    // Not written back: a second request goes to the network again
    worker.handle_fetch(&get("http://localhost/unlisted.png")).await;
    assert_eq!(worker.fetcher.calls(), before + 2);
    assert_eq!(worker.storage().keys("v1").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_miss_returns_error_status_verbatim() {
    let worker =
      installed_worker(ScriptedFetcher::new().respond("http://localhost/gone", 410, "gone")).await;

    let outcome = worker.handle_fetch(&get("http://localhost/gone")).await;
    let resp = outcome.into_response().unwrap().unwrap();
    assert_eq!(resp.status, 410);
    assert_eq!(resp.body, b"gone");
  }

  #[tokio::test]
  async fn test_network_failure_is_propagated() {
    let worker = installed_worker(ScriptedFetcher::new()).await;

    let outcome = worker.handle_fetch(&get("http://localhost/offline.js")).await;

    assert_eq!(outcome.source(), "network");
    let err = outcome.into_response().unwrap().unwrap_err();
    assert!(err.to_string().contains("connection refused"));
  }

  #[tokio::test]
  async fn test_bypass_touches_neither_store_nor_network() {
    let url = "chrome-extension://abcdef/content.js";
    let worker = OfflineWorker::new(
      InstrumentedStorage::new(),
      ScriptedFetcher::new().respond(url, 200, "fetched"),
      settings("v1", &[]),
    );

    // Even a stored entry for the exact URL must not be consulted
    let stored = Response {
      url: Url::parse(url).unwrap(),
      status: 200,
      status_text: "OK".to_string(),
      headers: Vec::new(),
      body: b"stored".to_vec(),
    };
    worker
      .storage()
      .put_all("v1", &[(RequestKey::new("GET", &stored.url), stored.clone())])
      .unwrap();

    let outcome = worker.handle_fetch(&get(url)).await;

    assert!(matches!(outcome, Interception::Passthrough));
    assert!(outcome.into_response().is_none());
    assert_eq!(worker.storage().lookups(), 0);
    assert_eq!(worker.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_bypass_prefix_ignores_case() {
    let mut settings = settings("v1", &[]);
    settings.bypass_prefixes = vec!["Chrome-Extension://".to_string()];
    let worker = OfflineWorker::new(InstrumentedStorage::new(), ScriptedFetcher::new(), settings);

    let outcome = worker
      .handle_fetch(&get("CHROME-EXTENSION://abcdef/content.js"))
      .await;

    assert!(matches!(outcome, Interception::Passthrough));
    assert_eq!(worker.storage().lookups(), 0);
    assert_eq!(worker.fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_intercepted_request_consults_store_once() {
    let worker = OfflineWorker::new(
      InstrumentedStorage::new(),
      ScriptedFetcher::new().respond("http://localhost/app.js", 200, "js"),
      settings("v1", &[]),
    );

    let outcome = worker.handle_fetch(&get("http://localhost/app.js")).await;

    assert_eq!(outcome.source(), "network");
    assert_eq!(worker.storage().lookups(), 1);
    assert_eq!(worker.fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_non_get_goes_to_network() {
    let worker = installed_worker(ScriptedFetcher::new()).await;
    let before = worker.fetcher.calls();

    let mut post = get("http://localhost/index.html");
    post.method = "POST".to_string();
    let outcome = worker.handle_fetch(&post).await;

    assert_eq!(outcome.source(), "network");
    assert_eq!(worker.fetcher.calls(), before + 1);
  }

  #[tokio::test]
  async fn test_older_store_answers_until_activation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    let old = OfflineWorker::new(
      SqliteStorage::open(Some(&path)).unwrap(),
      ScriptedFetcher::new().respond("http://localhost/index.html", 200, "old"),
      settings("v0", &["/index.html"]),
    );
    old.install().await.unwrap();

    let new = OfflineWorker::new(
      SqliteStorage::open(Some(&path)).unwrap(),
      ScriptedFetcher::new().respond("http://localhost/index.html", 200, "new"),
      settings("v1", &["/index.html"]),
    );
    new.install().await.unwrap();

    let body = |outcome: Interception| outcome.into_response().unwrap().unwrap().body;

    let before = new.handle_fetch(&get("http://localhost/index.html")).await;
    assert_eq!(body(before), b"old");

    new.activate().await.unwrap();
    let after = new.handle_fetch(&get("http://localhost/index.html")).await;
    assert_eq!(body(after), b"new");
  }

  #[tokio::test]
  async fn test_concurrent_requests_are_independent() {
    let worker =
      installed_worker(ScriptedFetcher::new().respond("http://localhost/a.png", 200, "a")).await;
    let before = worker.fetcher.calls();

    let handles: Vec<_> = (0..8)
      .map(|i| {
        let worker = worker.clone();
        tokio::spawn(async move {
          let url = if i % 2 == 0 {
            "http://localhost/index.html"
          } else {
            "http://localhost/a.png"
          };
          worker.handle_fetch(&get(url)).await.source()
        })
      })
      .collect();

    let mut sources = Vec::new();
    for handle in handles {
      sources.push(handle.await.unwrap());
    }

    assert_eq!(sources.iter().filter(|s| **s == "cache").count(), 4);
    assert_eq!(worker.fetcher.calls(), before + 4);
  }
}
