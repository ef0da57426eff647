/// Attestation error kinds (design document §7's "attestation" class: fatal
/// to the call, propagated to the caller verbatim).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Truncated { context: &'static str },
    UnexpectedSpecId { found: u8 },
    NonceMismatch,
    UnsupportedVersion { field: &'static str, found: String },
    SignatureMalformed,
    SignatureVerificationFailed,
    DuplicateMeasurementIndex { index: u8 },
    MissingMeasurement { index: u8 },
    CertParse { message: String },
    ChainUntrusted { message: String },
    Ocsp { message: String },
}

impl Error {
    pub fn level(&self) -> tracing::Level {
        tracing::Level::ERROR
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Truncated { context } => write!(f, "attestation report truncated while reading {context}"),
            Error::UnexpectedSpecId { found } => write!(f, "unexpected measurement spec id: {found:#x}"),
            Error::NonceMismatch => write!(f, "attestation nonce does not match the requested nonce"),
            Error::UnsupportedVersion { field, found } => {
                write!(f, "{field} version {found} is not in the allowed list")
            }
            Error::SignatureMalformed => write!(f, "attestation signature is malformed"),
            Error::SignatureVerificationFailed => write!(f, "attestation signature verification failed"),
            Error::DuplicateMeasurementIndex { index } => {
                write!(f, "measurement index {index} present in more than one reference bundle")
            }
            Error::MissingMeasurement { index } => {
                write!(f, "no matching measurement hash for index {index}")
            }
            Error::CertParse { message } => write!(f, "certificate parse error: {message}"),
            Error::ChainUntrusted { message } => write!(f, "certificate chain did not verify: {message}"),
            Error::Ocsp { message } => write!(f, "OCSP error: {message}"),
        }
    }
}

impl std::error::Error for Error {}
