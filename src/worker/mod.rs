//! The offline cache worker and its three lifecycle operations.
//!
//! The hosting runtime drives the worker through:
//! 1. [`OfflineWorker::install`] once per deployed version, awaited to completion
//! 2. [`OfflineWorker::activate`] after install, reclaiming stores of older versions
//! 3. [`OfflineWorker::handle_fetch`] for every request while the worker is in control
//!
//! Storage and network access are injected so the policy can run against any backend.

mod activate;
mod install;
mod intercept;

use color_eyre::Result;
use std::sync::Arc;
use url::Url;

use crate::cache::CacheStorage;
use crate::config::Config;
use crate::network::Fetcher;

pub use activate::ActivationReport;
pub use install::InstallReport;
pub use intercept::Interception;

/// The fixed inputs a worker is built with.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  /// Name of the current store
  pub cache_name: String,
  /// Base for relative manifest entries
  pub scope: Url,
  pub manifest: Vec<String>,
  pub bypass_prefixes: Vec<String>,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      cache_name: config.cache_name.clone(),
      scope: config.scope_url()?,
      manifest: config.manifest.clone(),
      bypass_prefixes: config.bypass_prefixes.clone(),
    })
  }
}

/// Cache-first offline worker over a storage backend and a fetcher.
pub struct OfflineWorker<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  settings: Arc<WorkerSettings>,
}

impl<S: CacheStorage, F: Fetcher> OfflineWorker<S, F> {
  pub fn new(storage: S, fetcher: F, settings: WorkerSettings) -> Self {
    Self {
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      settings: Arc::new(settings),
    }
  }

  /// Name of the store this worker owns.
  pub fn cache_name(&self) -> &str {
    &self.settings.cache_name
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for OfflineWorker<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      settings: Arc::clone(&self.settings),
    }
  }
}
