use std::fmt;

/// Crypto-layer error kinds, matching the taxonomy of design document §7.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// A framed ciphertext string did not have the `id:nonce:iv:ciphertext` shape.
    MalformedFrame { message: String },
    /// The `id` field of a frame did not match the session's id.
    IdMismatch { expected: String, found: String },
    /// The frame's nonce did not match the nonce already bound to this session.
    NonceMismatch,
    /// AEAD tag verification failed. Covers tampering and out-of-order /
    /// replayed sequence numbers, since both change the authenticated data.
    VerificationFailed,
    /// A response cipher tried to encrypt before any frame was decrypted.
    NoPriorDecryption,
    /// The per-direction sequence counter would wrap past `u32::MAX`.
    SequenceExhausted,
    /// No secret is cached locally for the id carried by a frame.
    SecretNotFound { id: String },
    /// The secret service rejected an upload or refresh.
    SecretService { message: String },
}

impl Error {
    pub fn level(&self) -> tracing::Level {
        match self {
            Error::MalformedFrame { .. } => tracing::Level::WARN,
            Error::IdMismatch { .. } => tracing::Level::WARN,
            Error::NonceMismatch => tracing::Level::WARN,
            Error::VerificationFailed => tracing::Level::WARN,
            Error::NoPriorDecryption => tracing::Level::ERROR,
            Error::SequenceExhausted => tracing::Level::ERROR,
            Error::SecretNotFound { .. } => tracing::Level::WARN,
            Error::SecretService { .. } => tracing::Level::ERROR,
        }
    }

    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            _ => tracing::info!("{self}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedFrame { message } => write!(f, "malformed frame: {message}"),
            Error::IdMismatch { expected, found } => {
                write!(f, "secret id mismatch: expected {expected}, found {found}")
            }
            Error::NonceMismatch => write!(f, "frame nonce does not match session nonce"),
            Error::VerificationFailed => write!(f, "AEAD verification failed"),
            Error::NoPriorDecryption => {
                write!(f, "cannot encrypt before at least one frame has been decrypted")
            }
            Error::SequenceExhausted => write!(f, "session frame sequence counter exhausted"),
            Error::SecretNotFound { id } => write!(f, "no secret cached for id {id}"),
            Error::SecretService { message } => write!(f, "secret service error: {message}"),
        }
    }
}

impl std::error::Error for Error {}
