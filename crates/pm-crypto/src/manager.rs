use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Error;
use crate::secret::Secret;

/// External collaborator: the remote secret service that secrets are
/// uploaded to. Its own API is out of scope (§1); the manager only needs to
/// be able to push a freshly generated secret with a TTL.
#[async_trait::async_trait]
pub trait SecretUploader: Send + Sync {
    async fn upload(&self, secret: &Secret, ttl: Duration) -> Result<(), Error>;
}

struct ManagerState {
    secret: Secret,
    /// `TTL - refresh_buffer` in the future: when the manager should next
    /// proactively refresh, distinct from `secret.expires_at` (the point at
    /// which the remote service itself considers the secret gone).
    refresh_at: SystemTime,
}

/// Holds one active [`Secret`], refreshing it ahead of its remote expiry.
/// A single `tokio::sync::Mutex` serializes refresh and read so that
/// concurrent callers never trigger two refreshes at once.
pub struct SecretManager {
    state: Mutex<Option<ManagerState>>,
    clock: Arc<dyn Clock>,
    uploader: Arc<dyn SecretUploader>,
    ttl: Duration,
    refresh_buffer: Duration,
    rng: SystemRandom,
}

impl SecretManager {
    pub fn new(
        clock: Arc<dyn Clock>,
        uploader: Arc<dyn SecretUploader>,
        ttl: Duration,
        refresh_buffer: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(None),
            clock,
            uploader,
            ttl,
            refresh_buffer,
            rng: SystemRandom::new(),
        }
    }

    /// Return the current secret, synchronously refreshing first if it is
    /// expired (or none has been generated yet).
    pub async fn latest_secret(&self) -> Result<Secret, Error> {
        let mut guard = self.state.lock().await;
        let now = self.clock.now();
        let needs_refresh = match &*guard {
            Some(state) => now >= state.refresh_at,
            None => true,
        };
        if needs_refresh {
            self.refresh_locked(&mut guard).await
        } else {
            #[allow(clippy::unwrap_used)]
            Ok(guard.as_ref().unwrap().secret.clone())
        }
    }

    /// Force a refresh regardless of expiry, used after the inference proxy
    /// reports "secret not found" for the id currently in use.
    pub async fn force_update(&self) -> Result<Secret, Error> {
        let mut guard = self.state.lock().await;
        self.refresh_locked(&mut guard).await
    }

    async fn refresh_locked(&self, guard: &mut Option<ManagerState>) -> Result<Secret, Error> {
        let now = self.clock.now();
        let mut data = [0u8; 32];
        self.rng.fill(&mut data).map_err(|_| Error::SecretService {
            message: "failed to generate random secret material".to_string(),
        })?;
        let secret = Secret {
            id: Uuid::new_v4().to_string(),
            data,
            expires_at: now + self.ttl,
        };

        self.uploader.upload(&secret, self.ttl).await?;

        let refresh_at = now + self.ttl.saturating_sub(self.refresh_buffer);
        let out = secret.clone();
        *guard = Some(ManagerState { secret, refresh_at });
        Ok(out)
    }

    /// Time until the next proactive refresh, or `Duration::ZERO` if one is
    /// already due. Used by the background loop to size its sleep.
    async fn time_until_refresh(&self) -> Duration {
        let guard = self.state.lock().await;
        let now = self.clock.now();
        match &*guard {
            Some(state) => state.refresh_at.duration_since(now).unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }

    /// Run forever, refreshing the secret ahead of its expiry. Intended to
    /// be spawned once per process and cancelled on shutdown.
    pub async fn run_background_refresh(self: Arc<Self>) {
        loop {
            let sleep_for = self.time_until_refresh().await;
            self.clock.sleep(sleep_for).await;
            let mut guard = self.state.lock().await;
            if let Err(e) = self.refresh_locked(&mut guard).await {
                e.log();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUploader(AtomicUsize);

    #[async_trait::async_trait]
    impl SecretUploader for CountingUploader {
        async fn upload(&self, _secret: &Secret, _ttl: Duration) -> Result<(), Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn latest_secret_refreshes_lazily_once() {
        let clock = Arc::new(VirtualClock::new(SystemTime::UNIX_EPOCH));
        let uploader = Arc::new(CountingUploader(AtomicUsize::new(0)));
        let manager = SecretManager::new(
            clock.clone(),
            uploader.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );

        let first = manager.latest_secret().await.unwrap();
        let second = manager.latest_secret().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(uploader.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn secret_rotates_after_ttl_minus_buffer_elapses() {
        let clock = Arc::new(VirtualClock::new(SystemTime::UNIX_EPOCH));
        let uploader = Arc::new(CountingUploader(AtomicUsize::new(0)));
        let manager = SecretManager::new(
            clock.clone(),
            uploader,
            Duration::from_secs(100),
            Duration::from_secs(10),
        );

        let first = manager.latest_secret().await.unwrap();
        clock.advance(Duration::from_secs(89)).await;
        let second = manager.latest_secret().await.unwrap();
        assert_eq!(first.id, second.id, "refresh buffer not yet reached");

        clock.advance(Duration::from_secs(2)).await;
        let third = manager.latest_secret().await.unwrap();
        assert_ne!(first.id, third.id, "should have rotated past TTL-buffer");
    }

    #[tokio::test]
    async fn force_update_rotates_even_when_fresh() {
        let clock = Arc::new(VirtualClock::new(SystemTime::UNIX_EPOCH));
        let uploader = Arc::new(CountingUploader(AtomicUsize::new(0)));
        let manager = SecretManager::new(clock, uploader, Duration::from_secs(3600), Duration::from_secs(60));

        let first = manager.latest_secret().await.unwrap();
        let forced = manager.force_update().await.unwrap();
        assert_ne!(first.id, forced.id);
    }
}
