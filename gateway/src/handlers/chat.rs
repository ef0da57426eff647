use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::{HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::Error;
use crate::handlers::common::{client_addr_of, proxy_json, read_body, JsonProxy};
use crate::selectors;
use crate::shard_key;
use crate::state::AppState;

const CACHE_SALT_FIELD: &str = "cache_salt";
const CACHE_SALT_BYTES: usize = 32;

/// Inject `cache_salt` into the request body if the caller did not supply
/// one, using the configured fixed salt if set, otherwise a fresh random
/// value (§4.4). Returns the salt that will be used for shard-key derivation.
fn ensure_cache_salt(body: &mut Value, fixed: Option<&str>) -> Result<String, Error> {
    let object = body.as_object_mut().ok_or_else(|| Error::ShardKey {
        message: "request body must be a JSON object".to_string(),
    })?;

    if !object.contains_key(CACHE_SALT_FIELD) {
        let salt = match fixed {
            Some(fixed) => fixed.to_string(),
            None => {
                let rng = ring::rand::SystemRandom::new();
                let mut raw = [0u8; CACHE_SALT_BYTES];
                ring::rand::SecureRandom::fill(&rng, &mut raw).map_err(|_| Error::ShardKey {
                    message: "failed to generate cache salt".to_string(),
                })?;
                BASE64.encode(raw)
            }
        };
        object.insert(CACHE_SALT_FIELD.to_string(), Value::String(salt));
    }

    object
        .get(CACHE_SALT_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::ShardKey {
            message: "cache_salt must be a JSON string".to_string(),
        })
}

async fn handle(state: AppState, addr: SocketAddr, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    let mut value: Value = serde_json::from_slice(&bytes).map_err(|e| Error::ShardKey {
        message: format!("invalid JSON body: {e}"),
    })?;

    let cache_salt = ensure_cache_salt(&mut value, state.config().gateway.fixed_cache_salt.as_deref())?;
    let content = shard_key::prompt_content(&value);
    let shard_key = shard_key::derive_shard_key(&cache_salt, &content)?;

    let mut headers = parts.headers.clone();
    let header_value = HeaderValue::from_str(&shard_key).map_err(|_| Error::ShardKey {
        message: "derived shard key is not a valid header value".to_string(),
    })?;
    headers.insert(HeaderName::from_static("privatemode-shard-key"), header_value);

    let client_addr = client_addr_of(&headers, &addr.to_string());

    proxy_json(
        &state,
        JsonProxy {
            method: parts.method,
            uri: parts.uri,
            headers,
            client_addr,
            plaintext_body: value,
            request_skip: selectors::chat_request_skip(),
            response_skip: selectors::id_usage_skip(),
        },
    )
    .await
}

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Result<Response, Error> {
    handle(state, addr, req).await
}

/// `POST /v1/completions`, the legacy completion route kept on the same
/// cache-affinity and encryption path as chat completions (§4.4).
pub async fn completions(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Result<Response, Error> {
    handle(state, addr, req).await
}
