use std::sync::Arc;

use futures::StreamExt;
use pm_crypto::RenewableRequestCipher;
use pm_forward::BoxStream;
use pm_mutate::event_stream::{mutate_event_stream_reader, BoxMutator, JsonMode};
use pm_mutate::{Error as MutateError, Selector};

/// Bridges the field-mutation engine's synchronous [`Mutator`](pm_mutate::Mutator)
/// contract to the session cipher's async API.
///
/// The cipher's `encrypt`/`decrypt` are only async because they go through a
/// `tokio::sync::Mutex` and may need to lazily fetch a secret (an HTTP call)
/// on first use. Callers must `.await` [`RenewableRequestCipher::secret_id`]
/// once per request before building these closures, which guarantees the
/// session already exists; every call made through the closures below then
/// only ever contends on an uncontended, already-warm mutex with no I/O
/// underneath, which is safe to drive with a bare executor.
fn crypto_err(e: pm_crypto::Error) -> MutateError {
    MutateError::MutatorFailed { message: e.to_string() }
}

pub fn encrypt_mutator(cipher: &RenewableRequestCipher) -> impl Fn(&str) -> Result<String, MutateError> + '_ {
    move |plaintext: &str| futures::executor::block_on(cipher.encrypt(plaintext)).map_err(crypto_err)
}

pub fn decrypt_mutator(cipher: &RenewableRequestCipher) -> impl Fn(&str) -> Result<String, MutateError> + '_ {
    move |framed: &str| futures::executor::block_on(cipher.decrypt(framed)).map_err(crypto_err)
}

/// Wraps an upstream event-stream byte stream in decryption, applying
/// full-JSON decryption with `skip` to each `data:` payload. Owns an `Arc`
/// clone of the cipher (rather than borrowing) since the returned stream
/// must be `'static`.
pub fn decrypt_event_stream(
    cipher: Arc<RenewableRequestCipher>,
    skip: Selector,
) -> impl Fn(BoxStream) -> BoxStream + Send + Sync + 'static {
    move |stream: BoxStream| -> BoxStream {
        let cipher = cipher.clone();
        let mutator: BoxMutator = Arc::new(move |framed: &str| {
            futures::executor::block_on(cipher.decrypt(framed)).map_err(crypto_err)
        });
        let io_stream = stream.map(|chunk| chunk.map_err(std::io::Error::other));
        let reader = tokio_util::io::StreamReader::new(io_stream);
        let buffered = tokio::io::BufReader::new(reader);
        let mutated = mutate_event_stream_reader(buffered, JsonMode::Full(skip.clone()), false, mutator);
        Box::pin(mutated.map(|r| r.map_err(|e| pm_forward::Error::Mutation(e))))
    }
}
