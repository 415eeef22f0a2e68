//! Versioned, named response stores.
//!
//! This module provides the persistent side of the offline cache:
//! - Any number of named stores, enumerated in creation order
//! - Entries keyed by request identity (method + URL without fragment)
//! - All-or-nothing batch writes for manifest population

mod storage;
mod traits;

pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CachedEntry, StoreInfo};
