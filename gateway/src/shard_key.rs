use sha2::{Digest, Sha256};

use crate::error::Error;

/// Below this many characters of prompt content, no fingerprint suffix is
/// emitted at all (§4.4: "below one cache block (~64 chars ~16 tokens)").
const CACHE_BLOCK_CHARS: usize = 64;

/// Refuse content beyond ~1M tokens (~4M chars), per §4.4.
const MAX_CONTENT_CHARS: usize = 4_000_000;

/// Block size (in characters) at each of the fingerprint's three coarsening
/// boundaries, and how many fingerprint characters each boundary emits
/// before moving to the next, coarser block size.
const LEVELS: [(usize, usize); 3] = [(1, 16), (8, 16), (32, 16)];

const BASE64_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// The ordered prompt-like fields whose presence contributes to the shard
/// key's content fingerprint (§4.4).
const PROMPT_FIELDS: [&str; 4] = ["tools", "messages", "prompt", "suffix"];

/// Concatenate the raw JSON text of whichever prompt-like fields are present
/// in `body`, in the fixed order `tools || messages || prompt || suffix`.
pub fn prompt_content(body: &serde_json::Value) -> String {
    let mut out = String::new();
    for field in PROMPT_FIELDS {
        if let Some(value) = body.get(field) {
            out.push_str(&value.to_string());
        }
    }
    out
}

/// Derive the `<16 hex chars>[-<fingerprint>]` shard key from a cache salt
/// and the prompt content it should be bound to (§3, §4.4).
pub fn derive_shard_key(cache_salt: &str, content: &str) -> Result<String, Error> {
    if content.len() > MAX_CONTENT_CHARS {
        return Err(Error::ShardKey {
            message: format!("prompt content of {} chars exceeds the {MAX_CONTENT_CHARS}-char limit", content.len()),
        });
    }

    let salt_hash = Sha256::digest(cache_salt.as_bytes());
    let prefix = hex::encode(&salt_hash[..8]);

    if content.len() < CACHE_BLOCK_CHARS {
        return Ok(prefix);
    }

    let fingerprint = rolling_fingerprint(&salt_hash, content);
    Ok(format!("{prefix}-{fingerprint}"))
}

fn rolling_fingerprint(seed: &[u8], content: &str) -> String {
    let bytes = content.as_bytes();
    let mut state: Vec<u8> = seed.to_vec();
    let mut pos = 0usize;
    let mut out = String::new();

    'levels: for (block_chars, max_codes) in LEVELS {
        for _ in 0..max_codes {
            if pos >= bytes.len() {
                break 'levels;
            }
            let end = (pos + block_chars).min(bytes.len());
            let block = &bytes[pos..end];

            let mut hasher = Sha256::new();
            hasher.update(&state);
            hasher.update(block);
            state = hasher.finalize().to_vec();

            let code = (state[0] & 0x3F) as usize;
            out.push(BASE64_ALPHABET[code] as char);
            pos = end;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_has_no_fingerprint_suffix() {
        let key = derive_shard_key("p1234567890123456789012345678912", "hi").unwrap();
        assert!(!key.contains('-'));
        assert_eq!(key.len(), 16);
        let expected = hex::encode(&Sha256::digest(b"p1234567890123456789012345678912")[..8]);
        assert_eq!(key, expected);
    }

    #[test]
    fn shard_key_is_deterministic_for_fixed_inputs() {
        let long_content = "x".repeat(200);
        let a = derive_shard_key("salt-a", &long_content).unwrap();
        let b = derive_shard_key("salt-a", &long_content).unwrap();
        assert_eq!(a, b);
        assert!(a.contains('-'));
    }

    #[test]
    fn differing_cache_salts_change_prefix() {
        let long_content = "x".repeat(200);
        let a = derive_shard_key("salt-a", &long_content).unwrap();
        let b = derive_shard_key("salt-b", &long_content).unwrap();
        assert_ne!(&a[..16], &b[..16]);
    }

    #[test]
    fn differing_content_changes_fingerprint_but_not_prefix() {
        let a = derive_shard_key("salt-a", &"x".repeat(200)).unwrap();
        let b = derive_shard_key("salt-a", &"y".repeat(200)).unwrap();
        assert_eq!(&a[..16], &b[..16]);
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_content_is_refused() {
        let huge = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(derive_shard_key("salt", &huge).is_err());
    }

    #[test]
    fn prompt_content_concatenates_in_fixed_order() {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}],
            "model": "m",
            "prompt": "legacy",
        });
        let content = prompt_content(&body);
        assert!(content.find("user").unwrap() < content.find("legacy").unwrap());
    }
}
