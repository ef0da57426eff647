//! GPU attestation report parsing and verification: SPDM measurement wire
//! format, signature and measurement checks, and certificate-chain
//! revocation via OCSP.

pub mod error;
pub mod revocation;
pub mod verify;
pub mod wire;

pub use error::Error;
pub use revocation::{check_revocation, combine, verify_chain, Mode, OcspResponder, OcspStatus, TrustAnchors};
pub use verify::{verify_driver_version, verify_measurements, verify_nonce, verify_signature, verify_vbios_version, ReferenceBundle};
pub use wire::{parse_report, MeasurementRecord, MeasurementRequest, MeasurementResponse, ParsedReport};
