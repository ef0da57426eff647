use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, Notify};

/// A source of wall-clock time that can be swapped for a deterministic fake
/// in tests. Using `SystemTime` rather than `Instant` mirrors the secret
/// manager's requirement that expiry comparisons survive host sleep: an
/// `Instant` can jump forward across a suspend/resume in ways that make
/// "monotonic-safe" timestamps the wrong tool, so everything here is anchored
/// to wall-clock time instead.
#[async_trait::async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> SystemTime;

    /// Sleep until roughly `dur` has elapsed according to this clock.
    async fn sleep(&self, dur: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// A clock driven by explicit `advance` calls instead of the OS clock, so
/// that secret-refresh tests can assert on virtual-time behavior without
/// real sleeps.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    inner: Arc<Mutex<SystemTime>>,
    notify: Arc<Notify>,
}

impl VirtualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub async fn advance(&self, dur: Duration) {
        let mut guard = self.inner.lock().await;
        *guard += dur;
        self.notify.notify_waiters();
    }
}

#[async_trait::async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> SystemTime {
        // `try_lock` is safe here: nothing holds this mutex across an await
        // point other than `advance`, and `now` is never called concurrently
        // with itself in a way that would contend indefinitely.
        match self.inner.try_lock() {
            Ok(guard) => *guard,
            Err(_) => SystemTime::now(),
        }
    }

    async fn sleep(&self, dur: Duration) {
        let deadline = self.now() + dur;
        loop {
            if self.now() >= deadline {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn virtual_clock_sleep_unblocks_on_advance() {
        let clock = VirtualClock::new(SystemTime::UNIX_EPOCH);
        let clock2 = clock.clone();
        let sleeper = tokio::spawn(async move {
            clock2.sleep(Duration::from_secs(10)).await;
        });
        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());
        clock.advance(Duration::from_secs(5)).await;
        sleeper.await.unwrap();
    }
}
