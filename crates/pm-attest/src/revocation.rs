use std::time::SystemTime;

use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, VerifyingKey};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::Error;

/// Which embedded trust anchor and OCSP registration rules apply to a chain
/// (§4.7's "Certificate-chain revocation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    GpuAttestation,
    VbiosRim,
    DriverRim,
}

/// DER-encoded roots pinned per mode. Deployments embed the real NVIDIA
/// roots via `include_bytes!` in the binary that constructs this, mirroring
/// how the platform's other attestation verifier pins its trust anchor.
#[derive(Debug, Clone)]
pub struct TrustAnchors {
    pub gpu_attestation: &'static [u8],
    pub vbios_rim: &'static [u8],
    pub driver_rim: &'static [u8],
}

impl TrustAnchors {
    fn root_for(&self, mode: Mode) -> &'static [u8] {
        match mode {
            Mode::GpuAttestation => self.gpu_attestation,
            Mode::VbiosRim => self.vbios_rim,
            Mode::DriverRim => self.driver_rim,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OcspStatus {
    Good,
    Unknown,
    /// Ordered so that an earlier revocation time sorts first when multiple
    /// `Revoked` results are compared (§8's OCSP-combination property).
    Revoked(i64),
}

/// `combine(statuses)`: Revoked (earliest timestamp) > Unknown > Good.
pub fn combine(statuses: &[OcspStatus]) -> OcspStatus {
    let earliest_revocation = statuses
        .iter()
        .filter_map(|s| match s {
            OcspStatus::Revoked(at) => Some(*at),
            _ => None,
        })
        .min();
    if let Some(at) = earliest_revocation {
        return OcspStatus::Revoked(at);
    }
    if statuses.iter().any(|s| *s == OcspStatus::Unknown) {
        return OcspStatus::Unknown;
    }
    OcspStatus::Good
}

#[async_trait::async_trait]
pub trait OcspResponder: Send + Sync {
    async fn query(&self, cert_der: &[u8], issuer_der: &[u8]) -> Result<OcspStatus, Error>;
}

fn parse_cert(der: &[u8]) -> Result<X509Certificate<'_>, Error> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| Error::CertParse { message: e.to_string() })?;
    Ok(cert)
}

fn verify_signed_by(subject_der: &[u8], issuer_der: &[u8]) -> Result<(), Error> {
    let subject = parse_cert(subject_der)?;
    let issuer = parse_cert(issuer_der)?;

    let issuer_key_bytes = issuer.public_key().subject_public_key.data.as_ref();
    let verifying_key =
        VerifyingKey::from_sec1_bytes(issuer_key_bytes).map_err(|e| Error::ChainUntrusted { message: e.to_string() })?;

    let signature_bytes = subject.signature_value.data.as_ref();
    let signature = Signature::from_der(signature_bytes)
        .or_else(|_| Signature::from_slice(signature_bytes))
        .map_err(|_| Error::ChainUntrusted {
            message: "malformed chain signature".to_string(),
        })?;

    verifying_key
        .verify(subject.tbs_certificate.raw, &signature)
        .map_err(|_| Error::ChainUntrusted {
            message: "chain signature did not verify".to_string(),
        })
}

/// Verify `chain` (leaf first, root last) is signed bottom-up and that the
/// final certificate matches the embedded trust anchor for `mode`.
pub fn verify_chain(chain: &[Vec<u8>], mode: Mode, anchors: &TrustAnchors) -> Result<(), Error> {
    if chain.is_empty() {
        return Err(Error::ChainUntrusted {
            message: "empty certificate chain".to_string(),
        });
    }
    for pair in chain.windows(2) {
        verify_signed_by(&pair[0], &pair[1])?;
    }
    let root = chain.last().expect("checked non-empty above");
    if root.as_slice() != anchors.root_for(mode) {
        return Err(Error::ChainUntrusted {
            message: "chain root is not the pinned trust anchor".to_string(),
        });
    }
    Ok(())
}

/// Query OCSP for every certificate in `chain` except the leaf when `mode`
/// is `GpuAttestation` (that cert is issued on-demand and never registered
/// with the responder), and combine the results.
pub async fn check_revocation(
    chain: &[Vec<u8>],
    mode: Mode,
    responder: &dyn OcspResponder,
) -> Result<OcspStatus, Error> {
    let skip_leaf = mode == Mode::GpuAttestation;
    let mut statuses = Vec::new();
    for (i, window) in chain.windows(2).enumerate() {
        if skip_leaf && i == 0 {
            continue;
        }
        statuses.push(responder.query(&window[0], &window[1]).await?);
    }
    Ok(combine(&statuses))
}

pub fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_prefers_revoked_over_unknown_and_good() {
        let statuses = [OcspStatus::Good, OcspStatus::Revoked(100), OcspStatus::Revoked(50), OcspStatus::Unknown];
        assert_eq!(combine(&statuses), OcspStatus::Revoked(50));
    }

    #[test]
    fn combine_prefers_unknown_over_good() {
        assert_eq!(combine(&[OcspStatus::Good, OcspStatus::Unknown]), OcspStatus::Unknown);
    }

    #[test]
    fn combine_of_all_good_is_good() {
        assert_eq!(combine(&[OcspStatus::Good, OcspStatus::Good]), OcspStatus::Good);
    }

    #[test]
    fn combine_of_empty_is_good() {
        assert_eq!(combine(&[]), OcspStatus::Good);
    }
}
