//! Session cipher and secret-rotation primitives shared by both proxies.
//!
//! This crate is a dependency-free leaf: it has no knowledge of HTTP,
//! JSON bodies, or the wire protocol used to talk to the remote secret
//! service — only of framed ciphertext and secret lifecycle.

pub mod clock;
pub mod error;
pub mod frame;
pub mod manager;
pub mod renewable;
pub mod secret;
pub mod session;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use error::Error;
pub use frame::Frame;
pub use manager::{SecretManager, SecretUploader};
pub use renewable::RenewableRequestCipher;
pub use secret::Secret;
pub use session::{Role, SessionCipher};
