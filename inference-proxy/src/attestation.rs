//! Verifies the confidential-inference backend's GPU attestation report
//! before this process will forward any traffic to it (§4.7's "used by the
//! server host to decide whether a backend node is trustworthy").

use std::collections::{HashMap, HashSet};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use p384::ecdsa::VerifyingKey;
use pm_attest::wire::REQUEST_LEN;
use pm_attest::{
    check_revocation, parse_report, verify_chain, verify_driver_version, verify_measurements, verify_nonce,
    verify_signature, verify_vbios_version, Mode, OcspResponder, OcspStatus, ReferenceBundle, TrustAnchors,
};

use crate::config::AttestationConfig;
use crate::error::Error;

/// A minimal HTTP OCSP responder client: POSTs the DER-encoded subject and
/// issuer certificates to a configured base URL and expects a small JSON
/// status body back. `pm_attest::OcspResponder` deliberately abstracts the
/// wire protocol away from the verifier; this is this deployment's concrete
/// choice, not a re-derivation of RFC 6960's ASN.1 request encoding.
pub struct HttpOcspResponder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcspResponder {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[derive(serde::Deserialize)]
struct OcspStatusBody {
    status: String,
    revoked_at: Option<i64>,
}

#[async_trait::async_trait]
impl OcspResponder for HttpOcspResponder {
    async fn query(&self, cert_der: &[u8], issuer_der: &[u8]) -> Result<OcspStatus, pm_attest::Error> {
        let body = serde_json::json!({
            "certificate": BASE64.encode(cert_der),
            "issuer": BASE64.encode(issuer_der),
        });
        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| pm_attest::Error::Ocsp { message: e.to_string() })?;
        let parsed: OcspStatusBody = response
            .json()
            .await
            .map_err(|e| pm_attest::Error::Ocsp { message: e.to_string() })?;
        match parsed.status.as_str() {
            "good" => Ok(OcspStatus::Good),
            "revoked" => Ok(OcspStatus::Revoked(parsed.revoked_at.unwrap_or(0))),
            _ => Ok(OcspStatus::Unknown),
        }
    }
}

fn load_bundle(path: &std::path::Path) -> Result<ReferenceBundle, Error> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("failed to read reference bundle {}: {e}", path.display()),
    })?;
    let entries: HashMap<String, Vec<String>> = serde_json::from_str(&raw).map_err(|e| Error::Config {
        message: format!("invalid reference bundle {}: {e}", path.display()),
    })?;
    let mut bundle: ReferenceBundle = HashMap::new();
    for (index, hashes) in entries {
        let index: u8 = index.parse().map_err(|_| Error::Config {
            message: format!("reference bundle {} has a non-numeric index {index}", path.display()),
        })?;
        bundle.insert(index, hashes.into_iter().collect::<HashSet<_>>());
    }
    Ok(bundle)
}

fn leaf_public_key(leaf_der: &[u8]) -> Result<VerifyingKey, Error> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(leaf_der).map_err(|e| Error::Config {
        message: format!("failed to parse leaf attestation certificate: {e}"),
    })?;
    let key_bytes = cert.public_key().subject_public_key.data.as_ref();
    VerifyingKey::from_sec1_bytes(key_bytes).map_err(|e| Error::Config {
        message: format!("leaf attestation certificate does not carry a P-384 key: {e}"),
    })
}

async fn fetch_report(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, Error> {
    client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Config { message: format!("failed to fetch attestation report: {e}") })?
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| Error::Config { message: format!("failed to read attestation report body: {e}") })
}

async fn fetch_chain(client: &reqwest::Client, url: &str) -> Result<Vec<Vec<u8>>, Error> {
    let encoded: Vec<String> = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Config { message: format!("failed to fetch attestation chain: {e}") })?
        .json()
        .await
        .map_err(|e| Error::Config { message: format!("invalid attestation chain response: {e}") })?;
    encoded
        .into_iter()
        .map(|cert| BASE64.decode(cert).map_err(|e| Error::Config { message: format!("invalid chain certificate base64: {e}") }))
        .collect()
}

/// Fetch the backend's attestation report and certificate chain, parse and
/// verify both (signature, reference measurements, driver/VBIOS version,
/// chain trust, OCSP revocation), and return an error if the backend cannot
/// be trusted. Run once at startup; a failure here is a fatal configuration
/// error (§7: "Configuration errors exit non-zero at startup").
pub async fn verify_backend(
    cfg: &AttestationConfig,
    anchors: &TrustAnchors,
    ocsp: &dyn OcspResponder,
) -> Result<(), Error> {
    let client = reqwest::Client::new();
    let raw_report = fetch_report(&client, &cfg.report_url).await?;
    let chain = fetch_chain(&client, &cfg.chain_url).await?;

    let parsed = parse_report(&raw_report, REQUEST_LEN)?;

    let nonce_bytes = hex::decode(&cfg.nonce_hex).map_err(|e| Error::Config {
        message: format!("invalid attestation nonce_hex: {e}"),
    })?;
    let nonce: [u8; 32] = nonce_bytes.try_into().map_err(|_| Error::Config {
        message: "attestation nonce_hex must decode to exactly 32 bytes".to_string(),
    })?;
    verify_nonce(&parsed, &nonce)?;

    let leaf = chain.first().ok_or_else(|| Error::Config {
        message: "attestation chain is empty".to_string(),
    })?;
    let leaf_key = leaf_public_key(leaf)?;
    verify_signature(&parsed, &leaf_key)?;

    let driver_bundle = load_bundle(&cfg.driver_reference_bundle_path)?;
    let vbios_bundle = load_bundle(&cfg.vbios_reference_bundle_path)?;
    verify_measurements(&parsed.response, &[&driver_bundle, &vbios_bundle], &[])?;
    verify_driver_version(&parsed.response, &cfg.allowed_driver_versions)?;
    verify_vbios_version(&parsed.response, &cfg.allowed_vbios_versions)?;

    verify_chain(&chain, Mode::GpuAttestation, anchors)?;
    let status = check_revocation(&chain, Mode::GpuAttestation, ocsp).await?;
    if !matches!(status, OcspStatus::Good) {
        return Err(Error::Config {
            message: format!("backend attestation chain is not OCSP-good: {status:?}"),
        });
    }

    Ok(())
}
