use std::time::SystemTime;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A symmetric secret: 256 raw bits plus the bookkeeping needed to rotate it.
/// `data` is zeroized on drop since it is key material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    #[zeroize(skip)]
    pub id: String,
    pub data: [u8; 32],
    #[zeroize(skip)]
    pub expires_at: SystemTime,
}

impl Secret {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("data", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
