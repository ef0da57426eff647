use serde_json::{json, Value};

/// Forwarding-pipeline error kinds (design document §7's "upstream transport"
/// and "mutation" classes, plus the config errors a pipeline construction can
/// hit).
#[derive(Debug)]
pub enum Error {
    Config { message: String },
    Upstream { message: String },
    Cancelled,
    Mutation(pm_mutate::Error),
    Crypto(pm_crypto::Error),
}

impl Error {
    pub fn level(&self) -> tracing::Level {
        match self {
            Error::Config { .. } => tracing::Level::ERROR,
            Error::Upstream { .. } => tracing::Level::ERROR,
            Error::Cancelled => tracing::Level::WARN,
            Error::Mutation(_) => tracing::Level::WARN,
            Error::Crypto(_) => tracing::Level::ERROR,
        }
    }

    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            _ => tracing::debug!("{self}"),
        }
    }

    /// The OpenAI-style structured error body §4.2 requires on any pipeline
    /// failure, e.g. `{"error":{"message":"..."}}`.
    pub fn to_json_body(&self) -> Value {
        json!({ "error": { "message": self.to_string() } })
    }

    /// The `event: error` SSE frame used when the caller requested
    /// `text/event-stream` and the pipeline fails before any event is sent.
    pub fn to_event_stream_frame(&self) -> String {
        format!("event: error\ndata: {}\n\n", self.to_json_body())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config { message } => write!(f, "forwarding pipeline misconfigured: {message}"),
            Error::Upstream { message } => write!(f, "upstream request failed: {message}"),
            Error::Cancelled => write!(f, "request cancelled"),
            Error::Mutation(inner) => write!(f, "mutation failed: {inner}"),
            Error::Crypto(inner) => write!(f, "crypto failed: {inner}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<pm_mutate::Error> for Error {
    fn from(inner: pm_mutate::Error) -> Self {
        Error::Mutation(inner)
    }
}

impl From<pm_crypto::Error> for Error {
    fn from(inner: pm_crypto::Error) -> Self {
        Error::Crypto(inner)
    }
}
