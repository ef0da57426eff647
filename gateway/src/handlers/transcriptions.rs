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

fn multipart_boundary(headers: &HeaderMap) -> Result<String, Error> {
    let content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Config {
            message: "missing content-type for multipart request".to_string(),
        })?;
    multer::parse_boundary(content_type).map_err(|e| Error::Config {
        message: format!("invalid multipart content-type: {e}"),
    })
}

fn identity_headers(_headers: &mut HeaderMap) {}

fn identity_stream(stream: BoxStream) -> BoxStream {
    stream
}

/// `POST /v1/audio/transcriptions`. Every form field except `model` is
/// encrypted in place; the boundary and filenames/content-types are kept
/// (§4.4). Audio transcription responses carry no internal structure worth
/// preserving selectively, so the whole response body is decrypted as one
/// value.
pub async fn transcriptions(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let boundary = multipart_boundary(&parts.headers)?;
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
    let decrypt = crypto_bridge::decrypt_mutator(state.cipher());
    let skip = selectors::model_skip();
    let boundary_for_request = boundary.clone();

    let request_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let rendered = futures::executor::block_on(pm_mutate::mutate_multipart(bytes, &boundary_for_request, &skip, &encrypt))?;
        Ok(Bytes::from(rendered))
    };
    let response_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        let out = pm_mutate::mutate_full_body(&text, &decrypt)?;
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
