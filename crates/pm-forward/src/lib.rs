//! The forwarding pipeline shared by both proxies: rewrite, mutate, send,
//! retry, and mutate the response, independent of which adapter or handler
//! is driving it.

pub mod error;
pub mod headers;
pub mod pipeline;
pub mod retry;

pub use error::Error;
pub use pipeline::{BoxStream, ForwardRequest, ForwardedResponse, Forwarder, Mutators, ResponseBody};
pub use retry::{single_retry_on_reset, single_retry_on_status, RetryDecision, RetryPolicy, RESET_RETRY_DELAY};
