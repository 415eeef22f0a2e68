//! Cache-first offline asset manager.
//!
//! Keeps a versioned, persistent store of the assets a web application needs to run
//! offline, reclaims stores left behind by older versions, and answers requests from
//! the store before falling back to the network.

pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod network;
pub mod worker;

pub use cache::{CacheStorage, SqliteStorage};
pub use config::Config;
pub use http::{Request, RequestKey, Response};
pub use network::{Fetcher, HttpFetcher};
pub use worker::{ActivationReport, InstallReport, Interception, OfflineWorker, WorkerSettings};
