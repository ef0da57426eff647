use std::sync::{Arc, Mutex};

use futures::StreamExt;
use pm_crypto::{Role, SessionCipher};
use pm_forward::BoxStream;
use pm_mutate::event_stream::{mutate_event_stream_reader, BoxMutator, JsonMode};
use pm_mutate::{Error as MutateError, Selector};
use pm_secret_sync::{SecretStore, Watcher};

use crate::error::Error;

/// One request's server-side session cipher (§5: "Session cipher: owned by
/// a single request's task"). Unlike the client-side `RenewableRequestCipher`
/// (async only because of its lazy fetch), `SessionCipher`'s own methods are
/// synchronous `&mut self` calls once `(id, key)` is known, so a plain
/// `std::sync::Mutex` is enough to share it across the `Fn + Send + Sync`
/// mutator closures `pm_forward::Mutators` requires, with no `block_on`
/// bridging needed.
pub struct RequestSession {
    cipher: Mutex<SessionCipher>,
}

impl RequestSession {
    /// Resolve `secret_id` via the watcher's cache (falling back to a direct
    /// store read on a miss, §4.6 step 5) and open a fresh server-role
    /// session for this request.
    pub async fn resolve<S: SecretStore>(watcher: &Watcher<S>, secret_id: &str) -> Result<Arc<Self>, Error> {
        let key = watcher
            .get_or_fetch(secret_id)
            .await?
            .ok_or_else(|| Error::SecretNotFound { id: secret_id.to_string() })?;
        Ok(Arc::new(Self {
            cipher: Mutex::new(SessionCipher::new(secret_id.to_string(), key, Role::Server)),
        }))
    }

    fn with_cipher<T>(&self, f: impl FnOnce(&mut SessionCipher) -> Result<T, pm_crypto::Error>) -> Result<T, MutateError> {
        let mut guard = self.cipher.lock().expect("session cipher mutex poisoned");
        f(&mut guard).map_err(|e| MutateError::MutatorFailed { message: e.to_string() })
    }

    pub fn decrypt_mutator(self: &Arc<Self>) -> impl Fn(&str) -> Result<String, MutateError> + Send + Sync + 'static {
        let session = self.clone();
        move |framed: &str| session.with_cipher(|cipher| cipher.decrypt(framed))
    }

    pub fn encrypt_mutator(self: &Arc<Self>) -> impl Fn(&str) -> Result<String, MutateError> + Send + Sync + 'static {
        let session = self.clone();
        move |plaintext: &str| session.with_cipher(|cipher| cipher.encrypt(plaintext))
    }

    /// Decrypt a JSON subtree that was spliced in whole, as a quoted string
    /// of framed ciphertext (the version-absent compatibility branch's
    /// selective "blob" encoding, §4.5/§9): unwrap the JSON string, decrypt,
    /// and hand back the plaintext unwrapped, so it re-parses as the
    /// original value rather than staying a string.
    pub fn decrypt_blob_mutator(self: &Arc<Self>) -> impl Fn(&str) -> Result<String, MutateError> + Send + Sync + 'static {
        let session = self.clone();
        move |raw: &str| {
            let framed: String =
                serde_json::from_str(raw).map_err(|_| MutateError::FieldNotString { raw: raw.to_string() })?;
            session.with_cipher(|cipher| cipher.decrypt(&framed))
        }
    }

    /// Inverse of [`decrypt_blob_mutator`]: encrypt a whole JSON subtree
    /// into the "blob" encoding for a version-absent legacy client.
    pub fn encrypt_blob_mutator(self: &Arc<Self>) -> impl Fn(&str) -> Result<String, MutateError> + Send + Sync + 'static {
        let session = self.clone();
        move |raw: &str| {
            let ciphertext = session.with_cipher(|cipher| cipher.encrypt(raw))?;
            serde_json::to_string(&ciphertext).map_err(|e| MutateError::InvalidMutatorOutput { message: e.to_string() })
        }
    }

    /// Wraps an outbound event-stream byte stream in encryption, applying
    /// `mode` to each `data:` payload. `legacy_done` selects whether the
    /// `[DONE]` sentinel itself is also encrypted, per the version-gated
    /// branch the caller resolved (§4.5).
    pub fn encrypt_event_stream(
        self: &Arc<Self>,
        mode: JsonMode,
        legacy_done: bool,
    ) -> impl Fn(BoxStream) -> BoxStream + Send + Sync + 'static {
        let session = self.clone();
        move |stream: BoxStream| -> BoxStream {
            let session = session.clone();
            let mutator: BoxMutator = Arc::new(move |plaintext: &str| session.with_cipher(|cipher| cipher.encrypt(plaintext)));
            let io_stream = stream.map(|chunk| chunk.map_err(std::io::Error::other));
            let reader = tokio_util::io::StreamReader::new(io_stream);
            let buffered = tokio::io::BufReader::new(reader);
            let mutated = mutate_event_stream_reader(buffered, mode.clone(), legacy_done, mutator);
            Box::pin(mutated.map(|r| r.map_err(pm_forward::Error::Mutation)))
        }
    }
}
