use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::Error;

/// The server-side proxy's in-memory secret cache: a read-write lock where
/// the watch loop is the sole writer and request handlers read concurrently
/// (§5's "Secret cache (server side)").
#[derive(Clone, Default)]
pub struct SecretCache {
    inner: Arc<RwLock<HashMap<String, [u8; 32]>>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<[u8; 32]> {
        self.inner.read().await.get(id).copied()
    }

    pub async fn put(&self, id: String, value: [u8; 32]) {
        self.inner.write().await.insert(id, value);
    }

    pub async fn remove(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

pub fn decode_secret(key: &str, value: &[u8]) -> Result<[u8; 32], Error> {
    value.try_into().map_err(|_| Error::MalformedValue { key: key.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = SecretCache::new();
        cache.put("a".to_string(), [1u8; 32]).await;
        assert_eq!(cache.get("a").await, Some([1u8; 32]));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn remove_clears_entry() {
        let cache = SecretCache::new();
        cache.put("a".to_string(), [1u8; 32]).await;
        cache.remove("a").await;
        assert_eq!(cache.get("a").await, None);
    }

    #[test]
    fn decode_secret_rejects_wrong_length() {
        assert!(decode_secret("k", &[0u8; 31]).is_err());
        assert!(decode_secret("k", &[0u8; 32]).is_ok());
    }
}
