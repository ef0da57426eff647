use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pm_crypto::{Secret, SecretUploader};
use serde::Serialize;

/// Pushes freshly generated secrets to the remote secret service over HTTP.
/// The service's own API is out of scope (§1); this is the thin HTTP client
/// the [`SecretManager`](pm_crypto::SecretManager) needs to push a secret.
pub struct HttpSecretUploader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSecretUploader {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    id: &'a str,
    secret: String,
    ttl_seconds: u64,
}

#[async_trait::async_trait]
impl SecretUploader for HttpSecretUploader {
    async fn upload(&self, secret: &Secret, ttl: Duration) -> Result<(), pm_crypto::Error> {
        let body = UploadRequest {
            id: &secret.id,
            secret: BASE64.encode(secret.data),
            ttl_seconds: ttl.as_secs(),
        };
        let response = self
            .client
            .post(format!("{}/secrets", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| pm_crypto::Error::SecretService {
                message: format!("failed to reach secret service: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(pm_crypto::Error::SecretService {
                message: format!("secret service rejected upload with status {}", response.status()),
            });
        }
        Ok(())
    }
}
