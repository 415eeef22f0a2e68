//! Manifest population on install.

use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use futures::future::try_join_all;
use std::collections::HashSet;
use tracing::{error, info};

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::http::{Request, RequestKey, Response};
use crate::network::Fetcher;

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cache_name: String,
  /// Number of manifest entries written
  pub stored: usize,
}

impl<S: CacheStorage, F: Fetcher> OfflineWorker<S, F> {
  /// Open the current store and fill it with every manifest asset.
  ///
  /// All assets are fetched concurrently and written in one batch, so either the whole
  /// manifest lands in the store or none of this run's responses do. A failure is logged
  /// and returned; the store itself stays open (possibly empty). Nothing is retried.
  pub async fn install(&self) -> Result<InstallReport> {
    let cache_name = self.cache_name();
    info!(
      cache = cache_name,
      assets = self.settings.manifest.len(),
      "Install event in progress"
    );

    match self.populate().await {
      Ok(report) => {
        info!(
          cache = cache_name,
          stored = report.stored,
          "Caching complete, ready for offline use"
        );
        Ok(report)
      }
      Err(e) => {
        error!(cache = cache_name, error = %e, "Failed to cache assets");
        Err(e)
      }
    }
  }

  async fn populate(&self) -> Result<InstallReport> {
    let cache_name = self.cache_name();
    self.storage.open_store(cache_name)?;

    let requests = self.manifest_requests()?;
    let responses = try_join_all(requests.iter().map(|req| self.fetch_asset(req))).await?;

    let entries: Vec<(RequestKey, Response)> = requests
      .iter()
      .map(Request::key)
      .zip(responses)
      .collect();

    self
      .storage
      .put_all(cache_name, &entries)
      .wrap_err_with(|| format!("Failed to store manifest in {}", cache_name))?;

    Ok(InstallReport {
      cache_name: cache_name.to_string(),
      stored: entries.len(),
    })
  }

  /// Resolve the manifest against the scope, rejecting repeated entries.
  fn manifest_requests(&self) -> Result<Vec<Request>> {
    let mut seen = HashSet::new();
    let mut requests = Vec::with_capacity(self.settings.manifest.len());

    for entry in &self.settings.manifest {
      let request = Request::resolve("GET", entry, &self.settings.scope)?;
      if !seen.insert(request.key()) {
        return Err(eyre!("Duplicate manifest entry: {}", request.url));
      }
      requests.push(request);
    }

    Ok(requests)
  }

  async fn fetch_asset(&self, request: &Request) -> Result<Response> {
    let response = self
      .fetcher
      .fetch(request)
      .await
      .wrap_err_with(|| format!("Manifest entry {} could not be fetched", request.url))?;

    if !response.ok() {
      return Err(eyre!(
        "Manifest entry {} returned status {}",
        request.url,
        response.status
      ));
    }

    Ok(response)
  }
}
