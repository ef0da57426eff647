use std::fmt;

/// Mutation-layer error kinds. These surface as 500s if they happen before
/// response streaming begins, or are logged and terminate the connection
/// once streaming is underway (design document §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidJson { message: String },
    InvalidSelector { message: String },
    FieldNotString { raw: String },
    MutatorFailed { message: String },
    InvalidMutatorOutput { message: String },
    Multipart { message: String },
    Io { message: String },
}

impl Error {
    pub fn level(&self) -> tracing::Level {
        tracing::Level::WARN
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidJson { message } => write!(f, "invalid JSON body: {message}"),
            Error::InvalidSelector { message } => write!(f, "invalid field selector: {message}"),
            Error::FieldNotString { raw } => {
                write!(f, "expected a JSON string at this path, found: {raw}")
            }
            Error::MutatorFailed { message } => write!(f, "mutator failed: {message}"),
            Error::InvalidMutatorOutput { message } => {
                write!(f, "mutator produced invalid JSON: {message}")
            }
            Error::Multipart { message } => write!(f, "multipart error: {message}"),
            Error::Io { message } => write!(f, "I/O error: {message}"),
        }
    }
}

impl std::error::Error for Error {}
