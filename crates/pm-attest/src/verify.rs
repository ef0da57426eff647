use std::collections::{HashMap, HashSet};

use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha384};

use crate::error::Error;
use crate::wire::{MeasurementResponse, ParsedReport, SIGNATURE_LEN};

/// Opaque-field type carrying the driver version string.
pub const DRIVER_VERSION_OPAQUE_TYPE: u16 = 0x0002;
/// Opaque-field type carrying the VBIOS version, stored reversed (§4.7).
pub const VBIOS_VERSION_OPAQUE_TYPE: u16 = 0x0003;

pub fn verify_nonce(parsed: &ParsedReport, expected_nonce: &[u8; 32]) -> Result<(), Error> {
    if &parsed.request.nonce != expected_nonce {
        return Err(Error::NonceMismatch);
    }
    Ok(())
}

fn opaque_string(response: &MeasurementResponse, field_type: u16) -> Option<String> {
    response
        .opaque_fields
        .iter()
        .find(|f| f.field_type == field_type)
        .map(|f| String::from_utf8_lossy(&f.value).into_owned())
}

/// Format a byte-reversed VBIOS version as `XX.XX.XX.XX` (§4.7).
fn format_vbios_version(reversed_bytes: &[u8]) -> String {
    reversed_bytes
        .iter()
        .rev()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(".")
}

pub fn verify_driver_version(response: &MeasurementResponse, allowed: &[String]) -> Result<(), Error> {
    let Some(found) = opaque_string(response, DRIVER_VERSION_OPAQUE_TYPE) else {
        return Ok(());
    };
    let matches = allowed.iter().any(|v| v.eq_ignore_ascii_case(&found));
    if matches {
        Ok(())
    } else {
        Err(Error::UnsupportedVersion {
            field: "driver",
            found,
        })
    }
}

pub fn verify_vbios_version(response: &MeasurementResponse, allowed: &[String]) -> Result<(), Error> {
    let Some(field) = response.opaque_fields.iter().find(|f| f.field_type == VBIOS_VERSION_OPAQUE_TYPE) else {
        return Ok(());
    };
    let found = format_vbios_version(&field.value);
    let matches = allowed.iter().any(|v| v.eq_ignore_ascii_case(&found));
    if matches {
        Ok(())
    } else {
        Err(Error::UnsupportedVersion {
            field: "vbios",
            found,
        })
    }
}

/// Verify the attestation signature: the leaf certificate's ECDSA-P384
/// public key against a SHA-384 digest of the full request followed by the
/// full response minus its trailing signature.
pub fn verify_signature(parsed: &ParsedReport, leaf_public_key: &VerifyingKey) -> Result<(), Error> {
    let mut hasher = Sha384::new();
    hasher.update(&parsed.request_bytes);
    hasher.update(&parsed.response_bytes_without_signature);
    let digest = hasher.finalize();

    if parsed.response.signature.len() != SIGNATURE_LEN {
        return Err(Error::SignatureMalformed);
    }
    let signature = Signature::from_slice(&parsed.response.signature).map_err(|_| Error::SignatureMalformed)?;

    leaf_public_key
        .verify(&digest, &signature)
        .map_err(|_| Error::SignatureVerificationFailed)
}

/// A reference-measurement bundle: index → set of acceptable hex-encoded
/// hashes, as supplied independently for the driver and for the VBIOS
/// (§4.7's "merge the active resources from both reference bundles").
pub type ReferenceBundle = HashMap<u8, HashSet<String>>;

fn merge_bundles(bundles: &[&ReferenceBundle]) -> Result<HashMap<u8, HashSet<String>>, Error> {
    let mut merged: HashMap<u8, HashSet<String>> = HashMap::new();
    for bundle in bundles {
        for (&index, hashes) in bundle.iter() {
            if merged.contains_key(&index) {
                return Err(Error::DuplicateMeasurementIndex { index });
            }
            merged.insert(index, hashes.clone());
        }
    }
    Ok(merged)
}

/// Validate every reported measurement against the merged reference
/// bundles, skipping indices in `allow_mismatch`.
pub fn verify_measurements(
    response: &MeasurementResponse,
    bundles: &[&ReferenceBundle],
    allow_mismatch: &[u8],
) -> Result<(), Error> {
    let merged = merge_bundles(bundles)?;
    for record in &response.records {
        if allow_mismatch.contains(&record.index) {
            continue;
        }
        let Some(accepted) = merged.get(&record.index) else {
            continue;
        };
        if !accepted.contains(&record.value_hex()) {
            return Err(Error::MissingMeasurement { index: record.index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{parse_report, MeasurementRecord};
    use p384::ecdsa::{signature::Signer, SigningKey};
    use rand_core::OsRng;

    fn record(index: u8, value: &[u8]) -> MeasurementRecord {
        MeasurementRecord {
            index,
            spec_id: crate::wire::DMTF_SPEC_ID,
            value_type: 1,
            value: value.to_vec(),
        }
    }

    fn response_with(records: Vec<MeasurementRecord>, opaque: Vec<crate::wire::OpaqueField>) -> MeasurementResponse {
        MeasurementResponse {
            header: [0; 5],
            records,
            nonce: [0; 32],
            opaque_fields: opaque,
            signature: [0; 96],
        }
    }

    #[test]
    fn nonce_must_match_exactly() {
        let parsed = ParsedReport {
            request_bytes: vec![],
            response_bytes_without_signature: vec![],
            request: crate::wire::MeasurementRequest {
                header: [0; 8],
                nonce: [7; 32],
                slot_id: 0,
            },
            response: response_with(vec![], vec![]),
        };
        assert!(verify_nonce(&parsed, &[7; 32]).is_ok());
        assert_eq!(verify_nonce(&parsed, &[8; 32]).unwrap_err(), Error::NonceMismatch);
    }

    #[test]
    fn vbios_version_reverses_bytes_before_formatting() {
        let response = response_with(
            vec![],
            vec![crate::wire::OpaqueField {
                field_type: VBIOS_VERSION_OPAQUE_TYPE,
                value: vec![0x04, 0x03, 0x02, 0x01],
            }],
        );
        assert!(verify_vbios_version(&response, &["01.02.03.04".to_string()]).is_ok());
        assert!(verify_vbios_version(&response, &["04.03.02.01".to_string()]).is_err());
    }

    #[test]
    fn reference_bundle_merge_rejects_duplicate_index() {
        let mut a = ReferenceBundle::new();
        a.insert(0, HashSet::from(["aa".to_string()]));
        let mut b = ReferenceBundle::new();
        b.insert(0, HashSet::from(["bb".to_string()]));

        let response = response_with(vec![record(0, &[0xAA])], vec![]);
        let err = verify_measurements(&response, &[&a, &b], &[]).unwrap_err();
        assert_eq!(err, Error::DuplicateMeasurementIndex { index: 0 });
    }

    #[test]
    fn allow_mismatch_list_tolerates_unrecognized_measurement() {
        let mut bundle = ReferenceBundle::new();
        bundle.insert(0, HashSet::from([hex::encode([0x00])]));
        bundle.insert(1, HashSet::from([hex::encode([0x01]), hex::encode([0x02])]));

        let response = response_with(vec![record(0, &[0x00]), record(1, &[0x99])], vec![]);
        assert!(verify_measurements(&response, &[&bundle], &[]).is_err());
        assert!(verify_measurements(&response, &[&bundle], &[1]).is_ok());
    }

    #[test]
    fn flipping_a_signed_bit_breaks_verification() {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);

        let request_bytes = vec![1u8, 2, 3];
        let mut response_bytes_without_signature = vec![4u8, 5, 6];

        let mut hasher = Sha384::new();
        hasher.update(&request_bytes);
        hasher.update(&response_bytes_without_signature);
        let digest = hasher.finalize();
        let signature: Signature = signing_key.sign(&digest);

        let mut parsed = ParsedReport {
            request_bytes: request_bytes.clone(),
            response_bytes_without_signature: response_bytes_without_signature.clone(),
            request: crate::wire::MeasurementRequest {
                header: [0; 8],
                nonce: [0; 32],
                slot_id: 0,
            },
            response: response_with(vec![], vec![]),
        };
        parsed.response.signature.copy_from_slice(signature.to_bytes().as_slice());
        assert!(verify_signature(&parsed, &verifying_key).is_ok());

        response_bytes_without_signature[0] ^= 0x01;
        parsed.response_bytes_without_signature = response_bytes_without_signature;
        assert!(verify_signature(&parsed, &verifying_key).is_err());
    }
}
