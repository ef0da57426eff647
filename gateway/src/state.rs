use std::sync::Arc;

use http::Uri;
use pm_crypto::{RenewableRequestCipher, SecretManager, SystemClock};
use pm_forward::Forwarder;

use crate::config::Config;
use crate::error::Error;
use crate::secret_uploader::HttpSecretUploader;

/// Shared, long-lived state handed to every handler (design note §9:
/// explicit objects, not ambient globals).
#[derive(Clone)]
pub struct AppState(Arc<AppStateInner>);

pub struct AppStateInner {
    pub config: Config,
    pub forwarder: Forwarder,
    /// `Arc`-wrapped so streaming response mutators, which must be `'static`,
    /// can own a cheap clone instead of borrowing from the request's stack
    /// frame.
    pub cipher: Arc<RenewableRequestCipher>,
    pub secret_manager: Arc<SecretManager>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder().build().map_err(|e| Error::Config {
            message: format!("failed to build HTTP client: {e}"),
        })?;

        let upstream: Uri = config.upstream.url.parse().map_err(|e| Error::Config {
            message: format!("invalid upstream url {}: {e}", config.upstream.url),
        })?;
        let forwarder = Forwarder::new(client.clone(), upstream);

        let uploader = Arc::new(HttpSecretUploader::new(client, config.secret.service_url.clone()));
        let secret_manager = Arc::new(SecretManager::new(
            Arc::new(SystemClock),
            uploader,
            config.secret.ttl(),
            config.secret.refresh_buffer(),
        ));
        let cipher = Arc::new(RenewableRequestCipher::new(secret_manager.clone()));

        Ok(Self(Arc::new(AppStateInner {
            config,
            forwarder,
            cipher,
            secret_manager,
        })))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.0.forwarder
    }

    pub fn cipher(&self) -> &Arc<RenewableRequestCipher> {
        &self.0.cipher
    }

    pub fn secret_manager(&self) -> &Arc<SecretManager> {
        &self.0.secret_manager
    }

    /// Spawn the background secret-refresh loop; cancelled by dropping the
    /// returned handle's task on shutdown.
    pub fn spawn_secret_refresh(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.0.secret_manager.clone();
        tokio::spawn(async move { manager.run_background_refresh().await })
    }
}
