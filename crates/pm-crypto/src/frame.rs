use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// A parsed `id:nonce:iv:ciphertext` wire frame, per the framed-ciphertext
/// format in the data model.
pub struct Frame {
    pub id: String,
    pub nonce: [u8; NONCE_LEN],
    pub iv: [u8; NONCE_LEN],
    pub ciphertext_and_tag: Vec<u8>,
}

impl Frame {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut parts = raw.splitn(4, ':');
        let id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MalformedFrame {
                message: "missing id".to_string(),
            })?
            .to_string();
        let nonce_b64 = parts.next().ok_or_else(|| Error::MalformedFrame {
            message: "missing nonce".to_string(),
        })?;
        let iv_b64 = parts.next().ok_or_else(|| Error::MalformedFrame {
            message: "missing iv".to_string(),
        })?;
        let ct_b64 = parts.next().ok_or_else(|| Error::MalformedFrame {
            message: "missing ciphertext".to_string(),
        })?;

        let nonce = decode_fixed(nonce_b64, "nonce")?;
        let iv = decode_fixed(iv_b64, "iv")?;
        let ciphertext_and_tag = BASE64.decode(ct_b64).map_err(|e| Error::MalformedFrame {
            message: format!("invalid ciphertext base64: {e}"),
        })?;
        if ciphertext_and_tag.len() < TAG_LEN {
            return Err(Error::MalformedFrame {
                message: "ciphertext shorter than AEAD tag".to_string(),
            });
        }

        Ok(Self {
            id,
            nonce,
            iv,
            ciphertext_and_tag,
        })
    }

    pub fn render(id: &str, nonce: &[u8; NONCE_LEN], iv: &[u8; NONCE_LEN], ciphertext_and_tag: &[u8]) -> String {
        format!(
            "{id}:{}:{}:{}",
            BASE64.encode(nonce),
            BASE64.encode(iv),
            BASE64.encode(ciphertext_and_tag)
        )
    }
}

fn decode_fixed(b64: &str, field: &str) -> Result<[u8; NONCE_LEN], Error> {
    let bytes = BASE64.decode(b64).map_err(|e| Error::MalformedFrame {
        message: format!("invalid {field} base64: {e}"),
    })?;
    bytes.try_into().map_err(|bytes: Vec<u8>| Error::MalformedFrame {
        message: format!("{field} must be {NONCE_LEN} bytes, got {}", bytes.len()),
    })
}

/// Derive the per-frame IV from the session nonce and the frame's sequence
/// number, so that reuse is impossible as long as sequences are not
/// replayed: XOR the big-endian sequence into the last 4 bytes of the
/// nonce, giving a distinct IV for every sequence value under one nonce.
pub fn derive_iv(nonce: &[u8; NONCE_LEN], seq: u32) -> [u8; NONCE_LEN] {
    let mut iv = *nonce;
    let seq_be = seq.to_be_bytes();
    for i in 0..4 {
        iv[NONCE_LEN - 4 + i] ^= seq_be[i];
    }
    iv
}

/// Associated data binding a frame to its session id and sequence number.
pub fn associated_data(id: &str, seq: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(id.len() + 4);
    aad.extend_from_slice(id.as_bytes());
    aad.extend_from_slice(&seq.to_be_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_iv_is_distinct_per_sequence() {
        let nonce = [7u8; NONCE_LEN];
        assert_ne!(derive_iv(&nonce, 0), derive_iv(&nonce, 1));
        assert_eq!(derive_iv(&nonce, 0), nonce);
    }

    #[test]
    fn frame_round_trips_through_render_and_parse() {
        let nonce = [1u8; NONCE_LEN];
        let iv = derive_iv(&nonce, 3);
        let ct = vec![9u8; TAG_LEN + 5];
        let rendered = Frame::render("secret-1", &nonce, &iv, &ct);
        let parsed = Frame::parse(&rendered).unwrap();
        assert_eq!(parsed.id, "secret-1");
        assert_eq!(parsed.nonce, nonce);
        assert_eq!(parsed.iv, iv);
        assert_eq!(parsed.ciphertext_and_tag, ct);
    }

    #[test]
    fn frame_parse_rejects_missing_fields() {
        assert!(Frame::parse("only-id").is_err());
        assert!(Frame::parse("id:not-base64:also-not:nope").is_err());
    }
}
