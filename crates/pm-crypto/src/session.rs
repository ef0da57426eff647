use ring::aead::{self, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::Error;
use crate::frame::{associated_data, derive_iv, Frame, NONCE_LEN};

/// Whether this cipher plays the client (request-encrypting) or server
/// (response-encrypting) role. Only the role differs between the two ends
/// of a session: the framing, sequencing, and AEAD logic is identical, which
/// is why one type implements both the "request cipher" and the
/// "responseCipher" of the design document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// May set the session nonce itself on first `encrypt`.
    Client,
    /// May only encrypt after observing a nonce via a prior `decrypt`.
    Server,
}

/// One (id, nonce) session coupling a request and its response, per the data
/// model's Session cipher. A single instance is owned by one in-flight
/// request's task and is never shared across tasks.
pub struct SessionCipher {
    id: String,
    key: [u8; 32],
    role: Role,
    nonce: Option<[u8; NONCE_LEN]>,
    enc_seq: u32,
    dec_seq: u32,
    rng: SystemRandom,
}

struct FixedNonce(Nonce);

impl NonceSequence for FixedNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        // Each `SealingKey`/`OpeningKey` is used for exactly one seal/open
        // call, so there is only ever one nonce to hand out.
        let placeholder = Nonce::assume_unique_for_key([0u8; NONCE_LEN]);
        Ok(std::mem::replace(&mut self.0, placeholder))
    }
}

impl SessionCipher {
    pub fn new(id: impl Into<String>, key: [u8; 32], role: Role) -> Self {
        Self {
            id: id.into(),
            key,
            role,
            nonce: None,
            enc_seq: 0,
            dec_seq: 0,
            rng: SystemRandom::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_nonce(&self) -> Option<[u8; NONCE_LEN]> {
        self.nonce
    }

    /// Encrypt one field value, producing a framed ciphertext string.
    pub fn encrypt(&mut self, plaintext: &str) -> Result<String, Error> {
        let nonce = match self.nonce {
            Some(nonce) => nonce,
            None => {
                if self.role == Role::Server {
                    return Err(Error::NoPriorDecryption);
                }
                let mut fresh = [0u8; NONCE_LEN];
                self.rng
                    .fill(&mut fresh)
                    .map_err(|_| Error::SecretService {
                        message: "failed to generate random nonce".to_string(),
                    })?;
                self.nonce = Some(fresh);
                fresh
            }
        };

        let seq = self.enc_seq;
        self.enc_seq = seq.checked_add(1).ok_or(Error::SequenceExhausted)?;

        let iv = derive_iv(&nonce, seq);
        let aad = associated_data(&self.id, seq);

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| Error::SecretService {
            message: "invalid AEAD key length".to_string(),
        })?;
        let mut sealing = SealingKey::new(unbound, FixedNonce(Nonce::assume_unique_for_key(iv)));

        let mut in_out = plaintext.as_bytes().to_vec();
        sealing
            .seal_in_place_append_tag(aead::Aad::from(aad), &mut in_out)
            .map_err(|_| Error::VerificationFailed)?;

        Ok(Frame::render(&self.id, &nonce, &iv, &in_out))
    }

    /// Decrypt one framed ciphertext field value.
    pub fn decrypt(&mut self, framed: &str) -> Result<String, Error> {
        let frame = Frame::parse(framed)?;
        if frame.id != self.id {
            return Err(Error::IdMismatch {
                expected: self.id.clone(),
                found: frame.id,
            });
        }

        match self.nonce {
            None => self.nonce = Some(frame.nonce),
            Some(existing) if existing != frame.nonce => return Err(Error::NonceMismatch),
            Some(_) => {}
        }

        let seq = self.dec_seq;
        self.dec_seq = seq.checked_add(1).ok_or(Error::SequenceExhausted)?;
        let aad = associated_data(&self.id, seq);

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| Error::SecretService {
            message: "invalid AEAD key length".to_string(),
        })?;
        let mut opening = OpeningKey::new(unbound, FixedNonce(Nonce::assume_unique_for_key(frame.iv)));

        let mut in_out = frame.ciphertext_and_tag;
        let plaintext = opening
            .open_in_place(aead::Aad::from(aad), &mut in_out)
            .map_err(|_| Error::VerificationFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| Error::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_encrypt_decrypt() {
        let key = [0x42u8; 32];
        let mut client = SessionCipher::new("t", key, Role::Client);
        let mut server = SessionCipher::new("t", key, Role::Server);

        let framed = client.encrypt("hello").unwrap();
        let parsed = Frame::parse(&framed).unwrap();
        assert_eq!(parsed.id, "t");

        let decrypted = server.decrypt(&framed).unwrap();
        assert_eq!(decrypted, "hello");

        let response = server.encrypt("world").unwrap();
        let response_parsed = Frame::parse(&response).unwrap();
        assert_eq!(response_parsed.nonce, parsed.nonce);

        let client_decrypted = client.decrypt(&response).unwrap();
        assert_eq!(client_decrypted, "world");
    }

    #[test]
    fn second_encrypt_uses_incremented_sequence_same_nonce() {
        let key = [0x42u8; 32];
        let mut client = SessionCipher::new("t", key, Role::Client);
        let first = Frame::parse(&client.encrypt("hello").unwrap()).unwrap();
        let second = Frame::parse(&client.encrypt("world").unwrap()).unwrap();
        assert_eq!(first.nonce, second.nonce);
        assert_ne!(first.iv, second.iv);
    }

    #[test]
    fn server_cannot_encrypt_before_any_decryption() {
        let mut server = SessionCipher::new("t", [1u8; 32], Role::Server);
        assert_eq!(server.encrypt("x").unwrap_err(), Error::NoPriorDecryption);
    }

    #[test]
    fn id_mismatch_is_rejected() {
        let key = [9u8; 32];
        let mut a = SessionCipher::new("a", key, Role::Client);
        let mut b = SessionCipher::new("b", key, Role::Server);
        let framed = a.encrypt("hi").unwrap();
        assert_eq!(
            b.decrypt(&framed).unwrap_err(),
            Error::IdMismatch {
                expected: "b".to_string(),
                found: "a".to_string(),
            }
        );
    }

    #[test]
    fn out_of_order_sequence_fails_verification() {
        let key = [3u8; 32];
        let mut client = SessionCipher::new("t", key, Role::Client);
        let mut server = SessionCipher::new("t", key, Role::Server);

        let first = client.encrypt("one").unwrap();
        let second = client.encrypt("two").unwrap();

        // Feed frame 1 before frame 0: server's dec_seq is 0 when it arrives,
        // so the AAD it recomputes (seq=0) will not match what frame 1 was
        // authenticated under (seq=1).
        assert_eq!(server.decrypt(&second).unwrap_err(), Error::VerificationFailed);
        // Once desynchronized, the in-order frame now fails too, since
        // dec_seq already advanced past 0.
        assert_eq!(server.decrypt(&first).unwrap_err(), Error::VerificationFailed);
    }

    #[test]
    fn nonce_mismatch_is_rejected_on_subsequent_frames() {
        let key = [5u8; 32];
        let mut server = SessionCipher::new("t", key, Role::Server);
        let mut attacker = SessionCipher::new("t", key, Role::Client);
        let mut legit = SessionCipher::new("t", key, Role::Client);

        server.decrypt(&legit.encrypt("first").unwrap()).unwrap();
        let forged = attacker.encrypt("forged").unwrap();
        assert_eq!(server.decrypt(&forged).unwrap_err(), Error::NonceMismatch);
    }
}
