use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::headers::{append_forwarded_for, rewrite_to_upstream, strip_content_length, strip_hop_by_hop};
use crate::retry::RetryPolicy;

pub type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

const ENCRYPTED_HEADER: &str = "privatemode-encrypted";

/// One inbound request about to be forwarded upstream.
pub struct ForwardRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: String,
}

/// The mutation hooks §4.2 threads through the pipeline. Each is re-invoked
/// on every retry attempt, so encryption always uses a fresh iv and a fresh
/// sequence start per the retry policy's contract.
pub struct Mutators<'a> {
    pub request_body: &'a (dyn Fn(Bytes) -> Result<Bytes, Error> + Send + Sync),
    pub response_headers: &'a (dyn Fn(&mut HeaderMap) + Send + Sync),
    pub response_body: &'a (dyn Fn(Bytes) -> Result<Bytes, Error> + Send + Sync),
    pub response_stream: &'a (dyn Fn(BoxStream) -> BoxStream + Send + Sync),
}

fn identity_body(bytes: Bytes) -> Result<Bytes, Error> {
    Ok(bytes)
}

fn identity_headers(_headers: &mut HeaderMap) {}

fn identity_stream(stream: BoxStream) -> BoxStream {
    stream
}

impl<'a> Mutators<'a> {
    /// No mutation at all, for the unencrypted adapter (§4.5) or for error
    /// bodies that must never be run through decryption (§4.2 step 11).
    pub fn identity() -> Mutators<'static> {
        Mutators {
            request_body: &identity_body,
            response_headers: &identity_headers,
            response_body: &identity_body,
            response_stream: &identity_stream,
        }
    }
}

pub enum ResponseBody {
    Buffered(Bytes),
    Streamed(BoxStream),
}

pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

pub struct Forwarder {
    client: reqwest::Client,
    upstream: Uri,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, upstream: Uri) -> Self {
        Self { client, upstream }
    }

    /// Run the full pipeline: rewrite, mutate, send, optionally retry,
    /// mutate the response, and hand back a response ready for the caller
    /// to write downstream.
    pub async fn forward(
        &self,
        req: &ForwardRequest,
        mutators: &Mutators<'_>,
        retry_policy: Option<&RetryPolicy>,
        cancel: &CancellationToken,
    ) -> Result<ForwardedResponse, Error> {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.attempt_once(req, mutators, cancel).await {
                Ok(response) => return Ok(response),
                Err((err, status)) => {
                    let Some(policy) = retry_policy else {
                        return Err(err);
                    };
                    let decision = policy(status, &err.to_string(), attempt);
                    if !decision.should_retry {
                        return Err(err);
                    }
                    tracing::warn!(attempt, %err, "retrying forwarded request");
                    tokio::select! {
                        _ = tokio::time::sleep(decision.delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt_once(
        &self,
        req: &ForwardRequest,
        mutators: &Mutators<'_>,
        cancel: &CancellationToken,
    ) -> Result<ForwardedResponse, (Error, Option<u16>)> {
        let mut headers = req.headers.clone();
        strip_hop_by_hop(&mut headers);
        append_forwarded_for(&mut headers, &req.client_addr);
        let url = rewrite_to_upstream(&req.uri, &self.upstream).map_err(|e| (e, None))?;

        let mutated_body = (mutators.request_body)(req.body.clone()).map_err(|e| (e, None))?;

        let mut builder = self
            .client
            .request(req.method.clone(), url.to_string())
            .body(mutated_body.to_vec());
        for (name, value) in headers.iter() {
            builder = builder.header(name.clone(), value.clone());
        }

        let send = async { builder.send().await };
        let response = tokio::select! {
            result = send => result.map_err(|e| (Error::Upstream { message: e.to_string() }, e.status().map(|s| s.as_u16())))?,
            _ = cancel.cancelled() => return Err((Error::Cancelled, None)),
        };

        let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response_headers = http_headers_from_reqwest(response.headers());
        strip_hop_by_hop(&mut response_headers);

        let upstream_says_unencrypted = response_headers
            .get(ENCRYPTED_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);

        let is_event_stream = response_headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("event-stream"))
            .unwrap_or(false);

        (mutators.response_headers)(&mut response_headers);
        strip_content_length(&mut response_headers);

        let body = if is_event_stream {
            let upstream_stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| Error::Upstream { message: e.to_string() }));
            let boxed: BoxStream = Box::pin(upstream_stream);
            let mutated = if upstream_says_unencrypted {
                (identity_stream)(boxed)
            } else {
                (mutators.response_stream)(boxed)
            };
            ResponseBody::Streamed(mutated)
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| (Error::Upstream { message: e.to_string() }, None))?;
            let mutated = if upstream_says_unencrypted {
                identity_body(bytes)
            } else {
                (mutators.response_body)(bytes)
            }
            .map_err(|e| (e, None))?;
            ResponseBody::Buffered(mutated)
        };

        Ok(ForwardedResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

fn http_headers_from_reqwest(src: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len());
    for (name, value) in src.iter() {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_mutators_pass_bytes_through_unchanged() {
        let mutators = Mutators::identity();
        let out = (mutators.request_body)(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(out, Bytes::from_static(b"hello"));
    }
}
