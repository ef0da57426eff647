use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use serde_json::Value;

use crate::error::Error;
use crate::handlers::common::{client_addr_of, proxy_json, read_body, JsonProxy};
use crate::selectors;
use crate::state::AppState;

/// `POST /v1/embeddings`. No cache-affinity shard key: embedding batches are
/// not chat turns and have no stable session to pin to a worker (§4.4).
pub async fn embeddings(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| Error::ShardKey {
        message: format!("invalid JSON body: {e}"),
    })?;
    let client_addr = client_addr_of(&parts.headers, &addr.to_string());

    proxy_json(
        &state,
        JsonProxy {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            client_addr,
            plaintext_body: value,
            request_skip: selectors::model_only_selector(),
            response_skip: selectors::id_usage_skip(),
        },
    )
    .await
}
