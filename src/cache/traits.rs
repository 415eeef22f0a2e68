//! Core types for the cache stores.

use chrono::{DateTime, Utc};

use crate::http::{RequestKey, Response};

/// A stored response together with where and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// Name of the store that answered the lookup
  pub cache_name: String,
  pub key: RequestKey,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Summary of a single named store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
  pub name: String,
  pub entries: usize,
  pub created_at: DateTime<Utc>,
}
