use std::sync::Arc;

use axum::response::IntoResponse as _;
use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
use pm_forward::{ForwardedResponse, ResponseBody};

use crate::error::Error;
use crate::session::RequestSession;
use crate::state::AppState;

/// 100MiB, matching the client-side proxy's body-limit bump for chat payloads.
pub const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

pub async fn read_body(body: axum::body::Body) -> Result<Bytes, Error> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::Config {
            message: format!("failed to read request body: {e}"),
        })
}

/// Resolve the request's session cipher from its `Privatemode-Secret-ID`
/// header (§4.4's header injection guarantees gateway always sets it).
pub async fn resolve_session(state: &AppState, headers: &http::HeaderMap) -> Result<Arc<RequestSession>, Error> {
    let secret_id = crate::headers::secret_id(headers).ok_or_else(|| Error::SecretNotFound {
        id: "<missing Privatemode-Secret-ID header>".to_string(),
    })?;
    RequestSession::resolve(state.watcher(), secret_id).await
}

pub fn client_addr_of(headers: &http::HeaderMap, fallback: &str) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(fallback).trim().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

pub fn into_axum_response(resp: ForwardedResponse) -> axum::response::Response {
    let mut builder = axum::response::Response::builder().status(resp.status);
    if let Some(builder_headers) = builder.headers_mut() {
        for (name, value) in resp.headers.iter() {
            builder_headers.append(name.clone(), value.clone());
        }
    }
    let body = match resp.body {
        ResponseBody::Buffered(bytes) => axum::body::Body::from(bytes),
        ResponseBody::Streamed(stream) => {
            let mapped = stream.map(|chunk| {
                chunk.map_err(|e| {
                    e.log();
                    std::io::Error::other(e.to_string())
                })
            });
            axum::body::Body::from_stream(mapped)
        }
    };
    builder.body(body).unwrap_or_else(|e| {
        tracing::error!(%e, "failed to construct downstream response");
        (StatusCode::BAD_GATEWAY, "failed to construct response").into_response()
    })
}
