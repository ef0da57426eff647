use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::cache::{decode_secret, SecretCache};
use crate::error::Error;
use crate::store::{SecretStore, WatchEvent};

/// Populates [`SecretCache`] from a watched store, per §4.6's protocol:
/// seed from a prefix fetch, watch from the observed revision, restart the
/// watch on cancellation or error without losing the revision cursor.
pub struct Watcher<S: SecretStore> {
    store: Arc<S>,
    cache: SecretCache,
    prefix: String,
    restart_backoff: Duration,
}

impl<S: SecretStore> Watcher<S> {
    pub fn new(store: Arc<S>, cache: SecretCache, prefix: impl Into<String>) -> Self {
        Self {
            store,
            cache,
            prefix: prefix.into(),
            restart_backoff: Duration::from_millis(500),
        }
    }

    fn id_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.prefix)
    }

    async fn seed(&self) -> Result<i64, Error> {
        let (kvs, revision) = self.store.fetch_prefix(&self.prefix).await?;
        for kv in kvs {
            self.ingest_put(&kv.key, &kv.value).await;
        }
        Ok(revision)
    }

    async fn ingest_put(&self, key: &str, value: &[u8]) {
        let Some(id) = self.id_of(key) else { return };
        match decode_secret(key, value) {
            Ok(secret) => self.cache.put(id.to_string(), secret).await,
            Err(e) => tracing::warn!(%e, key, "dropping malformed secret value from watch"),
        }
    }

    async fn ingest_delete(&self, key: &str) {
        if let Some(id) = self.id_of(key) {
            self.cache.remove(id).await;
        }
    }

    /// Run until `cancel` fires. Restarts the watch from the last known
    /// revision on any error, per §4.6 step 4.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut revision = match self.seed().await {
            Ok(rev) => rev,
            Err(e) => {
                tracing::error!(%e, "failed to seed secret cache");
                return;
            }
        };

        while !cancel.is_cancelled() {
            let stream = match self.store.watch(&self.prefix, revision).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(%e, "secret watch failed to open, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(self.restart_backoff) => continue,
                        _ = cancel.cancelled() => return,
                    }
                }
            };
            tokio::pin!(stream);

            loop {
                let next = tokio::select! {
                    next = stream.next() => next,
                    _ = cancel.cancelled() => return,
                };
                match next {
                    Some(Ok(WatchEvent::Put(kv))) => {
                        self.ingest_put(&kv.key, &kv.value).await;
                    }
                    Some(Ok(WatchEvent::Delete { key })) => {
                        self.ingest_delete(&key).await;
                    }
                    Some(Ok(WatchEvent::ProgressNotify { revision: new_revision })) => {
                        revision = new_revision;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(%e, "secret watch errored, restarting from last revision");
                        break;
                    }
                    None => {
                        tracing::warn!("secret watch closed, restarting from last revision");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.restart_backoff) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// Read-through on a cache miss (§4.6 step 5).
    pub async fn get_or_fetch(&self, id: &str) -> Result<Option<[u8; 32]>, Error> {
        if let Some(secret) = self.cache.get(id).await {
            return Ok(Some(secret));
        }
        let key = format!("{}{id}", self.prefix);
        match self.store.get(&key).await? {
            Some(value) => {
                let secret = decode_secret(&key, &value)?;
                self.cache.put(id.to_string(), secret).await;
                Ok(Some(secret))
            }
            None => Ok(None),
        }
    }

    pub fn cache(&self) -> &SecretCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValue;
    use futures::stream::BoxStream;
    use std::sync::Mutex;

    struct FakeStore {
        seed_kvs: Vec<KeyValue>,
        seed_revision: i64,
        events: Mutex<Option<Vec<Result<WatchEvent, Error>>>>,
        get_responses: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl SecretStore for FakeStore {
        async fn fetch_prefix(&self, _prefix: &str) -> Result<(Vec<KeyValue>, i64), Error> {
            Ok((self.seed_kvs.clone(), self.seed_revision))
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
            Ok(self.get_responses.lock().unwrap().get(key).cloned())
        }

        async fn watch(&self, _prefix: &str, _revision: i64) -> Result<BoxStream<'static, Result<WatchEvent, Error>>, Error> {
            let events = self.events.lock().unwrap().take().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    #[tokio::test]
    async fn seed_populates_cache_from_prefix_fetch() {
        let store = Arc::new(FakeStore {
            seed_kvs: vec![KeyValue {
                key: "secrets/a".to_string(),
                value: vec![9u8; 32],
            }],
            seed_revision: 5,
            events: Mutex::new(Some(vec![])),
            get_responses: Mutex::new(Default::default()),
        });
        let cache = SecretCache::new();
        let watcher = Watcher::new(store, cache.clone(), "secrets/");
        watcher.seed().await.unwrap();
        assert_eq!(cache.get("a").await, Some([9u8; 32]));
    }

    #[tokio::test]
    async fn watch_events_update_and_remove_cache_entries() {
        let cache = SecretCache::new();
        let watcher = Watcher::new(
            Arc::new(FakeStore {
                seed_kvs: vec![],
                seed_revision: 1,
                events: Mutex::new(Some(vec![])),
                get_responses: Mutex::new(Default::default()),
            }),
            cache.clone(),
            "secrets/",
        );
        watcher.ingest_put("secrets/a", &[2u8; 32]).await;
        assert_eq!(cache.get("a").await, Some([2u8; 32]));
        watcher.ingest_delete("secrets/a").await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn run_drains_watch_events_then_returns_when_stream_closes_and_cancelled() {
        let cache = SecretCache::new();
        let store = Arc::new(FakeStore {
            seed_kvs: vec![],
            seed_revision: 1,
            events: Mutex::new(Some(vec![Ok(WatchEvent::Put(KeyValue {
                key: "secrets/a".to_string(),
                value: vec![3u8; 32],
            }))])),
            get_responses: Mutex::new(Default::default()),
        });
        let watcher = Watcher::new(store, cache.clone(), "secrets/");
        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();

        // The fake watch stream yields one event then closes; the loop
        // restarts the watch, observes cancellation, and returns.
        let handle = tokio::spawn(async move { watcher.run(cancel_for_task).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(cache.get("a").await, Some([3u8; 32]));
    }

    #[tokio::test]
    async fn get_or_fetch_reads_through_on_cache_miss() {
        let mut responses = std::collections::HashMap::new();
        responses.insert("secrets/b".to_string(), vec![7u8; 32]);
        let store = Arc::new(FakeStore {
            seed_kvs: vec![],
            seed_revision: 1,
            events: Mutex::new(Some(vec![])),
            get_responses: Mutex::new(responses),
        });
        let watcher = Watcher::new(store, SecretCache::new(), "secrets/");
        assert_eq!(watcher.get_or_fetch("b").await.unwrap(), Some([7u8; 32]));
        assert_eq!(watcher.get_or_fetch("missing").await.unwrap(), None);
    }
}
