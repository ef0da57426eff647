use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub gateway: GatewayApiConfig,
    pub upstream: UpstreamConfig,
    pub secret: SecretConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayApiConfig {
    pub bind_address: Option<SocketAddr>,
    /// A fixed cache salt to inject when the caller omits one; when absent a
    /// fresh 32-byte value is generated per request (§4.4).
    pub fixed_cache_salt: Option<String>,
    #[serde(default)]
    pub client_kind: ClientKind,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ClientKind {
    #[default]
    App,
    Proxy,
}

impl ClientKind {
    pub fn header_value(self) -> &'static str {
        match self {
            ClientKind::App => "App",
            ClientKind::Proxy => "Proxy",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the remote OpenAI-compatible API the gateway forwards to.
    pub url: String,
    /// Bearer token sent unless the caller already set `Authorization`.
    pub bearer_token: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    /// Base URL of the remote secret service's upload endpoint.
    pub service_url: String,
    pub ttl_seconds: u64,
    pub refresh_buffer_seconds: u64,
}

impl SecretConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_seconds)
    }
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
            [gateway]
            bind_address = "0.0.0.0:8085"

            [upstream]
            url = "https://api.privatemode.ai"

            [secret]
            service_url = "https://secrets.privatemode.ai"
            ttl_seconds = 3600
            refresh_buffer_seconds = 60
        "#;
        let table: toml::Table = raw.parse().unwrap();
        let config = Config::try_from(table).unwrap();
        assert_eq!(config.gateway.client_kind, ClientKind::App);
        assert_eq!(config.secret.ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"
            [gateway]
            bogus = true

            [upstream]
            url = "https://api.privatemode.ai"

            [secret]
            service_url = "https://secrets.privatemode.ai"
            ttl_seconds = 3600
            refresh_buffer_seconds = 60
        "#;
        let table: toml::Table = raw.parse().unwrap();
        assert!(Config::try_from(table).is_err());
    }
}
