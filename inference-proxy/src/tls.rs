use axum_server::tls_rustls::RustlsConfig;

use crate::config::ServerConfig;
use crate::error::Error;

/// Load the static keypair the HTTPS listener terminates TLS with (§6). A
/// single on-disk cert/key pair is all this deployment needs, unlike a
/// multi-tenant server picking a certificate per SNI name.
pub async fn load(config: &ServerConfig) -> Result<RustlsConfig, Error> {
    RustlsConfig::from_pem_file(&config.tls_cert_path, &config.tls_key_path)
        .await
        .map_err(|e| Error::Config {
            message: format!(
                "failed to load TLS keypair ({}, {}): {e}",
                config.tls_cert_path.display(),
                config.tls_key_path.display()
            ),
        })
}
