use futures::stream::BoxStream;

use crate::error::Error;

/// One key/value pair under the watched prefix.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// A single watch-channel event (§4.6 step 3).
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put(KeyValue),
    Delete { key: String },
    ProgressNotify { revision: i64 },
}

/// The watched key-value store the secret-sync watcher follows. Abstracted
/// behind a trait so the watch-restart logic can be tested without a live
/// etcd cluster.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch every key under `prefix` and the store's revision immediately
    /// after that read (§4.6 step 1–2).
    async fn fetch_prefix(&self, prefix: &str) -> Result<(Vec<KeyValue>, i64), Error>;

    /// Read a single key, used for the read-through on a cache miss (§4.6
    /// step 5).
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Open a watch over `prefix` starting at `revision`, with
    /// `require-leader + progress-notify` semantics (§4.6 step 2).
    async fn watch(&self, prefix: &str, revision: i64) -> Result<BoxStream<'static, Result<WatchEvent, Error>>, Error>;
}

/// [`SecretStore`] backed by a real etcd cluster.
pub struct EtcdSecretStore {
    client: etcd_client::Client,
}

impl EtcdSecretStore {
    pub fn new(client: etcd_client::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SecretStore for EtcdSecretStore {
    async fn fetch_prefix(&self, prefix: &str) -> Result<(Vec<KeyValue>, i64), Error> {
        let mut client = self.client.clone();
        let options = etcd_client::GetOptions::new().with_prefix();
        let response = client
            .get(prefix, Some(options))
            .await
            .map_err(|e| Error::Store { message: e.to_string() })?;

        let revision = response
            .header()
            .map(|h| h.revision())
            .ok_or_else(|| Error::Store {
                message: "get response missing header".to_string(),
            })?;

        let kvs = response
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: kv.value().to_vec(),
            })
            .collect();

        Ok((kvs, revision))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut client = self.client.clone();
        let response = client.get(key, None).await.map_err(|e| Error::Store { message: e.to_string() })?;
        Ok(response.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn watch(&self, prefix: &str, revision: i64) -> Result<BoxStream<'static, Result<WatchEvent, Error>>, Error> {
        let mut client = self.client.clone();
        let options = etcd_client::WatchOptions::new()
            .with_prefix()
            .with_start_revision(revision)
            .with_progress_notify()
            .with_require_leader();

        let (_watcher, stream) = client
            .watch(prefix, Some(options))
            .await
            .map_err(|e| Error::Store { message: e.to_string() })?;

        let initial = (stream, std::collections::VecDeque::<Result<WatchEvent, Error>>::new());
        let mapped = futures::stream::unfold(initial, |(mut stream, mut pending)| async move {
            use futures::StreamExt;
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (stream, pending)));
                }

                let next = stream.next().await?;
                match next {
                    Ok(mut resp) => {
                        if resp.canceled() {
                            return None;
                        }
                        let events = std::mem::take(resp.events_mut());
                        if events.is_empty() {
                            let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
                            return Some((Ok(WatchEvent::ProgressNotify { revision }), (stream, pending)));
                        }
                        for event in events {
                            let Some(kv) = event.kv() else { continue };
                            let key = String::from_utf8_lossy(kv.key()).into_owned();
                            let mapped_event = match event.event_type() {
                                etcd_client::EventType::Put => WatchEvent::Put(KeyValue {
                                    key,
                                    value: kv.value().to_vec(),
                                }),
                                etcd_client::EventType::Delete => WatchEvent::Delete { key },
                            };
                            pending.push_back(Ok(mapped_event));
                        }
                    }
                    Err(e) => pending.push_back(Err(Error::Store { message: e.to_string() })),
                }
            }
        });

        Ok(Box::pin(mapped))
    }
}
