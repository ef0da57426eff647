use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// Inference-proxy error taxonomy, independent of transport (design document §7).
#[derive(Debug)]
pub enum Error {
    Config { message: String },
    Crypto(pm_crypto::Error),
    Mutation(pm_mutate::Error),
    Forward(pm_forward::Error),
    SecretSync(pm_secret_sync::Error),
    Attestation(pm_attest::Error),
    /// No `Privatemode-Secret-ID` header, or the id carries no cached secret.
    ///
    /// The message always contains "no secret for id" verbatim: the gateway
    /// greps a buffered 5xx body for that phrase to decide whether a forced
    /// secret refresh and retry is worth attempting (§4.3, §8 scenario 8).
    SecretNotFound { id: String },
    UnsupportedVersion { header: String },
    NotFound,
}

impl Error {
    pub fn level(&self) -> tracing::Level {
        match self {
            Error::Config { .. } => tracing::Level::ERROR,
            Error::Crypto(_) => tracing::Level::ERROR,
            Error::Mutation(_) => tracing::Level::WARN,
            Error::Forward(inner) => inner.level(),
            Error::SecretSync(_) => tracing::Level::ERROR,
            Error::Attestation(_) => tracing::Level::ERROR,
            Error::SecretNotFound { .. } => tracing::Level::WARN,
            Error::UnsupportedVersion { .. } => tracing::Level::WARN,
            Error::NotFound => tracing::Level::WARN,
        }
    }

    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            _ => tracing::debug!("{self}"),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Mutation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Forward(_) => StatusCode::BAD_GATEWAY,
            Error::SecretSync(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Attestation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::SecretNotFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UnsupportedVersion { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config { message } => write!(f, "inference proxy misconfigured: {message}"),
            Error::Crypto(inner) => write!(f, "crypto failed: {inner}"),
            Error::Mutation(inner) => write!(f, "mutation failed: {inner}"),
            Error::Forward(inner) => write!(f, "forwarding failed: {inner}"),
            Error::SecretSync(inner) => write!(f, "secret sync failed: {inner}"),
            Error::Attestation(inner) => write!(f, "attestation failed: {inner}"),
            Error::SecretNotFound { id } => write!(f, "no secret for id {id}"),
            Error::UnsupportedVersion { header } => {
                write!(f, "unsupported Privatemode-Version header: {header}")
            }
            Error::NotFound => write!(f, "no handler for this path"),
        }
    }
}

impl std::error::Error for Error {}

impl From<pm_crypto::Error> for Error {
    fn from(inner: pm_crypto::Error) -> Self {
        Error::Crypto(inner)
    }
}

impl From<pm_mutate::Error> for Error {
    fn from(inner: pm_mutate::Error) -> Self {
        Error::Mutation(inner)
    }
}

impl From<pm_forward::Error> for Error {
    fn from(inner: pm_forward::Error) -> Self {
        Error::Forward(inner)
    }
}

impl From<pm_secret_sync::Error> for Error {
    fn from(inner: pm_secret_sync::Error) -> Self {
        Error::SecretSync(inner)
    }
}

impl From<pm_attest::Error> for Error {
    fn from(inner: pm_attest::Error) -> Self {
        Error::Attestation(inner)
    }
}

/// Errors always set `Privatemode-Encrypted: false` so a downstream hop does
/// not attempt decryption of the structured error body (§7).
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let body = json!({"error": {"message": self.to_string()}});
        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert("privatemode-encrypted", HeaderValue::from_static("false"));
        response
    }
}
