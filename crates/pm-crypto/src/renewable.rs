use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Error;
use crate::manager::SecretManager;
use crate::session::{Role, SessionCipher};

/// Client-side helper wrapping a [`SecretManager`] and a [`SessionCipher`].
/// Lazily fetches the latest secret on first use, and can discard the
/// current session to force a fresh secret after the inference proxy
/// reports "no secret for id" (it has not yet observed the new key).
pub struct RenewableRequestCipher {
    manager: Arc<SecretManager>,
    cipher: Mutex<Option<SessionCipher>>,
}

impl RenewableRequestCipher {
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cipher: Mutex::new(None),
        }
    }

    /// Current secret id in use, fetching one if none has been established
    /// yet.
    pub async fn secret_id(&self) -> Result<String, Error> {
        let mut guard = self.cipher.lock().await;
        self.ensure_cipher(&mut guard).await?;
        #[allow(clippy::unwrap_used)]
        Ok(guard.as_ref().unwrap().id().to_string())
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        let mut guard = self.cipher.lock().await;
        self.ensure_cipher(&mut guard).await?;
        #[allow(clippy::unwrap_used)]
        guard.as_mut().unwrap().encrypt(plaintext)
    }

    pub async fn decrypt(&self, framed: &str) -> Result<String, Error> {
        let mut guard = self.cipher.lock().await;
        self.ensure_cipher(&mut guard).await?;
        #[allow(clippy::unwrap_used)]
        guard.as_mut().unwrap().decrypt(framed)
    }

    /// Discard the current session and force the secret manager to mint a
    /// new secret, used by the forwarding pipeline's retry policy.
    pub async fn reset_secret(&self) -> Result<(), Error> {
        let mut guard = self.cipher.lock().await;
        let secret = self.manager.force_update().await?;
        *guard = Some(SessionCipher::new(secret.id, secret.data, Role::Client));
        Ok(())
    }

    async fn ensure_cipher(&self, guard: &mut Option<SessionCipher>) -> Result<(), Error> {
        if guard.is_none() {
            let secret = self.manager.latest_secret().await?;
            *guard = Some(SessionCipher::new(secret.id, secret.data, Role::Client));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::manager::SecretUploader;
    use crate::secret::Secret;
    use std::time::{Duration, SystemTime};

    struct NullUploader;

    #[async_trait::async_trait]
    impl SecretUploader for NullUploader {
        async fn upload(&self, _secret: &Secret, _ttl: Duration) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn encrypt_lazily_fetches_secret_once() {
        let clock = Arc::new(VirtualClock::new(SystemTime::UNIX_EPOCH));
        let manager = Arc::new(SecretManager::new(
            clock,
            Arc::new(NullUploader),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        ));
        let cipher = RenewableRequestCipher::new(manager);

        let id_before = cipher.secret_id().await.unwrap();
        let framed = cipher.encrypt("hello").await.unwrap();
        assert!(framed.starts_with(&format!("{id_before}:")));
    }

    #[tokio::test]
    async fn reset_secret_changes_session_id() {
        let clock = Arc::new(VirtualClock::new(SystemTime::UNIX_EPOCH));
        let manager = Arc::new(SecretManager::new(
            clock,
            Arc::new(NullUploader),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        ));
        let cipher = RenewableRequestCipher::new(manager);

        let before = cipher.secret_id().await.unwrap();
        cipher.reset_secret().await.unwrap();
        let after = cipher.secret_id().await.unwrap();
        assert_ne!(before, after);
    }
}
