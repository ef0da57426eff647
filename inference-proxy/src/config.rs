use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub secret_sync: SecretSyncConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    pub attestation: Option<AttestationConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_address: Option<SocketAddr>,
    /// PEM-encoded certificate chain and private key for the server-side
    /// HTTPS listener's static keypair (§6).
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// The confidential-inference backend is reached over plain `http`, no
    /// TLS, on a TCP host:port inside the same trust boundary as this
    /// process (§6).
    pub host: String,
    pub port: u16,
}

impl BackendConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretSyncConfig {
    pub etcd_endpoints: Vec<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "secrets/".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    #[serde(default)]
    pub kind: AdapterKind,
    /// Tasks advertised in the `/v1/models` response decoration (§4.5).
    #[serde(default = "default_tasks")]
    pub tasks: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: AdapterKind::default(),
            tasks: default_tasks(),
        }
    }
}

fn default_tasks() -> Vec<String> {
    vec!["chat".to_string(), "embeddings".to_string(), "transcriptions".to_string()]
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    #[default]
    Openai,
    Unstructured,
    /// Dev-only: no encryption at all (§4.5).
    Unencrypted,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationConfig {
    /// Whether the backend's GPU attestation is verified at startup (§4.7).
    #[serde(default)]
    pub enabled: bool,
    pub report_url: String,
    pub chain_url: String,
    pub nonce_hex: String,
    pub driver_reference_bundle_path: PathBuf,
    pub vbios_reference_bundle_path: PathBuf,
    #[serde(default)]
    pub allowed_driver_versions: Vec<String>,
    #[serde(default)]
    pub allowed_vbios_versions: Vec<String>,
    /// DER-encoded pinned root certificates for each chain mode (§4.7).
    pub gpu_attestation_root_path: PathBuf,
    pub vbios_rim_root_path: PathBuf,
    pub driver_rim_root_path: PathBuf,
}

impl TryFrom<toml::Table> for Config {
    type Error = Error;

    fn try_from(table: toml::Table) -> Result<Self, Self::Error> {
        table.try_into().map_err(|e| Error::Config {
            message: format!("failed to parse config:\n{e}"),
        })
    }
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Config, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file {}: {e}", path.display()),
        })?;
        let table: toml::Table = raw.parse().map_err(|e| Error::Config {
            message: format!("failed to parse config file {} as TOML: {e}", path.display()),
        })?;
        Config::try_from(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw = r#"
            [server]
            bind_address = "0.0.0.0:8085"
            tls_cert_path = "server.crt"
            tls_key_path = "server.key"

            [backend]
            host = "127.0.0.1"
            port = 9000

            [secret_sync]
            etcd_endpoints = ["http://127.0.0.1:2379"]
        "#;
        let table: toml::Table = raw.parse().unwrap();
        let config = Config::try_from(table).unwrap();
        assert_eq!(config.secret_sync.prefix, "secrets/");
        assert_eq!(config.adapter.kind, AdapterKind::Openai);
        assert_eq!(config.backend.base_url(), "http://127.0.0.1:9000");
        assert!(config.attestation.is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"
            [server]
            bogus = true
            tls_cert_path = "server.crt"
            tls_key_path = "server.key"

            [backend]
            host = "127.0.0.1"
            port = 9000

            [secret_sync]
            etcd_endpoints = ["http://127.0.0.1:2379"]
        "#;
        let table: toml::Table = raw.parse().unwrap();
        assert!(Config::try_from(table).is_err());
    }
}
