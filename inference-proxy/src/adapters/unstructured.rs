use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use bytes::Bytes;
use http::HeaderMap;
use pm_forward::{BoxStream, ForwardRequest, Mutators};
use tokio_util::sync::CancellationToken;

use crate::adapters::common::{client_addr_of, into_axum_response, read_body, resolve_session};
use crate::error::Error;
use crate::selectors;
use crate::state::AppState;

fn identity_headers(_headers: &mut HeaderMap) {}

fn identity_stream(stream: BoxStream) -> BoxStream {
    stream
}

/// `/unstructured/*`: the whole request body is one opaque ciphertext value
/// (full-body decrypt); the backend's JSON response is encrypted field by
/// field in full, since it carries real structure (§4.5).
pub async fn unstructured(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    let session = resolve_session(&state, &parts.headers).await?;
    let client_addr = client_addr_of(&parts.headers, &addr.to_string());

    let decrypt = session.decrypt_mutator();
    let encrypt = pm_mutate::string_field(session.encrypt_mutator());
    let response_skip = selectors::empty_skip();

    let request_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        let out = pm_mutate::mutate_full_body(&text, &decrypt)?;
        Ok(Bytes::from(out))
    };
    let response_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        let out = pm_mutate::mutate_json_full(&text, &response_skip, &encrypt)?;
        Ok(Bytes::from(out))
    };

    let mutators = Mutators {
        request_body: &request_body_mutator,
        response_headers: &identity_headers,
        response_body: &response_body_mutator,
        response_stream: &identity_stream,
    };

    let forward_request = ForwardRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body: bytes,
        client_addr,
    };
    let reset_retry = pm_forward::single_retry_on_reset(pm_forward::RESET_RETRY_DELAY);
    let cancel = CancellationToken::new();
    let response = state.forwarder().forward(&forward_request, &mutators, Some(&reset_retry), &cancel).await?;
    Ok(into_axum_response(response))
}

/// `GET /healthcheck`: passes through unchanged (§4.5).
pub async fn healthcheck(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    let client_addr = client_addr_of(&parts.headers, &addr.to_string());

    let forward_request = ForwardRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body: bytes,
        client_addr,
    };
    let mutators = Mutators::identity();
    let reset_retry = pm_forward::single_retry_on_reset(pm_forward::RESET_RETRY_DELAY);
    let cancel = CancellationToken::new();
    let response = state.forwarder().forward(&forward_request, &mutators, Some(&reset_retry), &cancel).await?;
    Ok(into_axum_response(response))
}
