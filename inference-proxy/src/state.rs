use std::sync::Arc;

use http::Uri;
use pm_forward::Forwarder;
use pm_secret_sync::{EtcdSecretStore, SecretCache, Watcher};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Error;

/// Shared, long-lived state handed to every handler (design note §9:
/// explicit objects, not ambient globals).
#[derive(Clone)]
pub struct AppState(Arc<AppStateInner>);

pub struct AppStateInner {
    pub config: Config,
    pub forwarder: Forwarder,
    pub watcher: Arc<Watcher<EtcdSecretStore>>,
    pub cancel: CancellationToken,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder().build().map_err(|e| Error::Config {
            message: format!("failed to build HTTP client: {e}"),
        })?;

        let backend: Uri = config.backend.base_url().parse().map_err(|e| Error::Config {
            message: format!("invalid backend address {}: {e}", config.backend.base_url()),
        })?;
        let forwarder = Forwarder::new(client, backend);

        let etcd_client = etcd_client::Client::connect(config.secret_sync.etcd_endpoints.clone(), None)
            .await
            .map_err(|e| Error::Config {
                message: format!("failed to connect to etcd: {e}"),
            })?;
        let store = Arc::new(EtcdSecretStore::new(etcd_client));
        let watcher = Arc::new(Watcher::new(store, SecretCache::new(), config.secret_sync.prefix.clone()));

        Ok(Self(Arc::new(AppStateInner {
            config,
            forwarder,
            watcher,
            cancel: CancellationToken::new(),
        })))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.0.forwarder
    }

    pub fn watcher(&self) -> &Arc<Watcher<EtcdSecretStore>> {
        &self.0.watcher
    }

    /// Spawn the secret-sync watch loop; cancelled via the shared token on
    /// shutdown rather than an abort, so an in-flight watch restart finishes
    /// cleanly (§4.6).
    pub fn spawn_secret_watch(&self) -> tokio::task::JoinHandle<()> {
        let watcher = self.0.watcher.clone();
        let cancel = self.0.cancel.clone();
        tokio::spawn(async move { watcher.run(cancel).await })
    }

    pub fn shutdown(&self) {
        self.0.cancel.cancel();
    }
}
