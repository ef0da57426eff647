use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use pm_forward::{ForwardRequest, Mutators};
use tokio_util::sync::CancellationToken;

use crate::adapters::common::{client_addr_of, into_axum_response, read_body};
use crate::error::Error;
use crate::state::AppState;

/// Forwards everything without mutation. Selected by configuration for
/// development only (§4.5) — there is no session cipher involved at all.
pub async fn passthrough(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
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
