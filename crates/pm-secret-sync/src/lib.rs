//! Populates the server-side proxy's secret cache from a watched key-value
//! store, per the protocol in §4.6: seed from a prefix fetch, then follow a
//! revision-resumable watch.

pub mod cache;
pub mod error;
pub mod store;
pub mod watcher;

pub use cache::SecretCache;
pub use error::Error;
pub use store::{EtcdSecretStore, KeyValue, SecretStore, WatchEvent};
pub use watcher::Watcher;
