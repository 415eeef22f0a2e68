//! Garbage collection of superseded stores on activation.

use color_eyre::{eyre::WrapErr, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::network::Fetcher;

/// Which stores activation reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Stores that were removed
  pub deleted: Vec<String>,
  /// Stores whose deletion failed, with the reason
  pub failed: Vec<(String, String)>,
}

impl<S: CacheStorage, F: Fetcher> OfflineWorker<S, F> {
  /// Delete every store whose name differs from the current version.
  ///
  /// Each deletion is attempted regardless of the others; failures are logged and
  /// collected in the report rather than aborting activation. Only failing to list the
  /// stores is an error.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let current = self.cache_name();
    info!(cache = current, "Activate event in progress");

    let stale: Vec<String> = self
      .storage
      .list_store_identifiers()
      .wrap_err("Failed to enumerate cache stores")?
      .into_iter()
      .filter(|name| name != current)
      .collect();

    let outcomes = join_all(stale.iter().map(|name| self.delete_stale(name))).await;

    let mut report = ActivationReport::default();
    for (name, outcome) in stale.into_iter().zip(outcomes) {
      match outcome {
        Ok(true) => report.deleted.push(name),
        // Gone already, e.g. removed by a concurrent activation
        Ok(false) => debug!(cache = %name, "Old cache already removed"),
        Err(e) => {
          warn!(cache = %name, error = %e, "Failed to delete old cache");
          report.failed.push((name, e.to_string()));
        }
      }
    }

    info!(
      cache = current,
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "Activation complete"
    );

    Ok(report)
  }

  async fn delete_stale(&self, name: &str) -> Result<bool> {
    info!(cache = name, "Deleting old cache");
    self.storage.delete_store(name)
  }
}
