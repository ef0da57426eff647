#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Store { message: String },
    MalformedValue { key: String },
}

impl Error {
    pub fn level(&self) -> tracing::Level {
        tracing::Level::ERROR
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Store { message } => write!(f, "secret store error: {message}"),
            Error::MalformedValue { key } => write!(f, "secret value at key {key} is not 32 bytes"),
        }
    }
}

impl std::error::Error for Error {}
