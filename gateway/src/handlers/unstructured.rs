use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use bytes::Bytes;
use http::HeaderMap;
use pm_forward::{BoxStream, ForwardRequest, Mutators};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::crypto_bridge;
use crate::error::Error;
use crate::handlers::common::{client_addr_of, into_axum_response, read_body};
use crate::headers::{inject_headers, HeaderContext};
use crate::selectors;
use crate::state::AppState;

fn identity_headers(_headers: &mut HeaderMap) {}

fn identity_stream(stream: BoxStream) -> BoxStream {
    stream
}

/// `/unstructured/*`, forwarding bodies with no JSON or multipart structure
/// to select into (§4.4): the whole body is one opaque value, encrypted and
/// decrypted as a unit rather than field by field.
pub async fn unstructured(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;

    let secret_id = state.cipher().secret_id().await?;
    let secret = state.secret_manager().latest_secret().await?;
    let request_id = format!("proxy_{}", Uuid::new_v4());

    let mut headers = parts.headers.clone();
    let ctx = HeaderContext {
        bearer_token: state.config().upstream.bearer_token.as_deref(),
        client_kind: state.config().gateway.client_kind,
        secret_id: &secret_id,
        secret_key: &secret.data,
        request_id: &request_id,
        attempt: 1,
        ocsp_allow_statuses: &["allow-good", "allow-unknown"],
        ocsp_not_before_unix: 0,
    };
    inject_headers(&mut headers, &ctx);

    let client_addr = client_addr_of(&headers, &addr.to_string());
    let encrypt = crypto_bridge::encrypt_mutator(state.cipher());
    let decrypt = pm_mutate::string_field(crypto_bridge::decrypt_mutator(state.cipher()));
    let response_skip = selectors::empty_skip();

    let request_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        let out = pm_mutate::mutate_full_body(&text, &encrypt)?;
        Ok(Bytes::from(out))
    };
    let response_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        let out = pm_mutate::mutate_json_full(&text, &response_skip, &decrypt)?;
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
        headers,
        body: bytes,
        client_addr,
    };
    let reset_retry = pm_forward::single_retry_on_reset(pm_forward::RESET_RETRY_DELAY);
    let cancel = CancellationToken::new();
    let response = state.forwarder().forward(&forward_request, &mutators, Some(&reset_retry), &cancel).await?;
    Ok(into_axum_response(response))
}
