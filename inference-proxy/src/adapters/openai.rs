use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use bytes::Bytes;
use http::HeaderMap;
use pm_forward::{BoxStream, ForwardRequest, Mutators};
use pm_mutate::event_stream::JsonMode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapters::common::{client_addr_of, into_axum_response, read_body, resolve_session};
use crate::error::Error;
use crate::headers;
use crate::selectors;
use crate::session::RequestSession;
use crate::state::AppState;
use crate::version::{self, ChatBranch};

const CACHE_SALT_FIELD: &str = "cache_salt";
const MIN_CACHE_SALT_LEN: usize = 32;
const STREAM_FIELD: &str = "stream";

fn identity_headers(_headers: &mut HeaderMap) {}

fn identity_stream(stream: BoxStream) -> BoxStream {
    stream
}

fn identity_body(bytes: Bytes) -> Result<Bytes, pm_forward::Error> {
    Ok(bytes)
}

fn wants_stream(bytes: &[u8]) -> bool {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|v| v.get(STREAM_FIELD).and_then(Value::as_bool))
        .unwrap_or(false)
}

fn check_cache_salt(text: &str) -> Result<(), pm_forward::Error> {
    let value: Value = serde_json::from_str(text).map_err(|e| pm_forward::Error::Config {
        message: format!("invalid JSON body: {e}"),
    })?;
    let ok = value
        .get(CACHE_SALT_FIELD)
        .and_then(Value::as_str)
        .map(|s| s.len() >= MIN_CACHE_SALT_LEN)
        .unwrap_or(false);
    if !ok {
        return Err(pm_forward::Error::Config {
            message: format!("cache_salt must be at least {MIN_CACHE_SALT_LEN} characters"),
        });
    }
    Ok(())
}

/// `POST /v1/chat/completions` and the legacy `/v1/completions`, dispatching
/// across the four `Privatemode-Version` compatibility branches (§4.5).
async fn handle_chat(state: AppState, addr: SocketAddr, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    let session = resolve_session(&state, &parts.headers).await?;
    let branch = version::classify(headers::client_version(&parts.headers));

    if branch == ChatBranch::VersionAbsent && wants_stream(&bytes) {
        return Err(Error::UnsupportedVersion {
            header: "streaming chat completions require a Privatemode-Version header".to_string(),
        });
    }

    let client_addr = client_addr_of(&parts.headers, &addr.to_string());
    let request_body_mutator = build_request_mutator(&session, branch);
    let response_body_mutator = build_response_mutator(&session, branch);
    let response_stream_mutator = build_stream_mutator(&session, branch);

    let mutators = Mutators {
        request_body: &request_body_mutator,
        response_headers: &identity_headers,
        response_body: &response_body_mutator,
        response_stream: &*response_stream_mutator,
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

fn build_request_mutator(
    session: &Arc<RequestSession>,
    branch: ChatBranch,
) -> impl Fn(Bytes) -> Result<Bytes, pm_forward::Error> + Send + Sync + 'static {
    let session = session.clone();
    move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        let out = match branch {
            ChatBranch::VersionAbsent => {
                let selector = selectors::legacy_chat_request_selector();
                let blob = session.decrypt_blob_mutator();
                pm_mutate::mutate_json_select(&text, &selector, &blob)?
            }
            ChatBranch::Legacy | ChatBranch::Intermediate | ChatBranch::Current => {
                let skip = selectors::chat_request_skip();
                let decrypt = pm_mutate::string_field(session.decrypt_mutator());
                let out = pm_mutate::mutate_json_full(&text, &skip, &decrypt)?;
                if branch == ChatBranch::Current {
                    check_cache_salt(&out)?;
                }
                out
            }
        };
        Ok(Bytes::from(out))
    }
}

fn build_response_mutator(
    session: &Arc<RequestSession>,
    branch: ChatBranch,
) -> impl Fn(Bytes) -> Result<Bytes, pm_forward::Error> + Send + Sync + 'static {
    let session = session.clone();
    move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        let out = match branch {
            ChatBranch::VersionAbsent => {
                let selector = selectors::legacy_chat_response_selector();
                let blob = session.encrypt_blob_mutator();
                pm_mutate::mutate_json_select(&text, &selector, &blob)?
            }
            ChatBranch::Legacy | ChatBranch::Intermediate | ChatBranch::Current => {
                let skip = selectors::id_usage_skip();
                let encrypt = pm_mutate::string_field(session.encrypt_mutator());
                pm_mutate::mutate_json_full(&text, &skip, &encrypt)?
            }
        };
        Ok(Bytes::from(out))
    }
}

/// Boxed because the version-absent branch doesn't support streaming at all
/// (rejected earlier in `handle_chat`) while the other three each need a
/// distinct `legacy_done` flag, giving three otherwise-identical closure
/// types that only a trait object can unify.
fn build_stream_mutator(session: &Arc<RequestSession>, branch: ChatBranch) -> Box<dyn Fn(BoxStream) -> BoxStream + Send + Sync + 'static> {
    match branch {
        ChatBranch::VersionAbsent => Box::new(identity_stream),
        ChatBranch::Legacy => {
            let mode = JsonMode::Full(selectors::id_usage_skip());
            Box::new(session.encrypt_event_stream(mode, true))
        }
        ChatBranch::Intermediate | ChatBranch::Current => {
            let mode = JsonMode::Full(selectors::id_usage_skip());
            Box::new(session.encrypt_event_stream(mode, false))
        }
    }
}

pub async fn chat_completions(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
    handle_chat(state, addr, req).await
}

pub async fn completions(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
    handle_chat(state, addr, req).await
}

/// `POST /v1/embeddings`: request skip `{model}`, response skip `{id, usage}`
/// (§4.5, mirroring §4.4's client-side pattern with no cache-affinity shard
/// key, since only the client side derives one).
pub async fn embeddings(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    let session = resolve_session(&state, &parts.headers).await?;
    let client_addr = client_addr_of(&parts.headers, &addr.to_string());

    let request_skip = selectors::model_only_selector();
    let decrypt = pm_mutate::string_field(session.decrypt_mutator());
    let response_skip = selectors::id_usage_skip();
    let encrypt = pm_mutate::string_field(session.encrypt_mutator());

    let request_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        Ok(Bytes::from(pm_mutate::mutate_json_full(&text, &request_skip, &decrypt)?))
    };
    let response_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        Ok(Bytes::from(pm_mutate::mutate_json_full(&text, &response_skip, &encrypt)?))
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

/// `POST /v1/audio/transcriptions`: multipart form, every field but `model`
/// decrypted; the backend's JSON response is re-encrypted as one whole-body
/// frame for the caller, mirroring the gateway's whole-body decrypt of this
/// same response (§4.5).
pub async fn transcriptions(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let content_type = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Config {
            message: "missing content-type for multipart request".to_string(),
        })?;
    let boundary = multer::parse_boundary(content_type).map_err(|e| Error::Config {
        message: format!("invalid multipart content-type: {e}"),
    })?;
    let bytes = read_body(body).await?;
    let session = resolve_session(&state, &parts.headers).await?;
    let client_addr = client_addr_of(&parts.headers, &addr.to_string());

    let skip = selectors::model_skip();
    let decrypt = session.decrypt_mutator();
    let encrypt = session.encrypt_mutator();
    let boundary_for_request = boundary.clone();

    let request_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let rendered = futures::executor::block_on(pm_mutate::mutate_multipart(bytes, &boundary_for_request, &skip, &decrypt))?;
        Ok(Bytes::from(rendered))
    };
    let response_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let text = String::from_utf8_lossy(&bytes);
        Ok(Bytes::from(pm_mutate::mutate_full_body(&text, &encrypt)?))
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

/// `GET /v1/models`: forwarded unencrypted, decorated with the configured
/// `tasks` list on every model entry (§4.5).
pub async fn models(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(body).await?;
    let client_addr = client_addr_of(&parts.headers, &addr.to_string());
    let tasks = state.config().adapter.tasks.clone();

    let response_body_mutator = move |bytes: Bytes| -> Result<Bytes, pm_forward::Error> {
        let mut value: Value = serde_json::from_slice(&bytes).map_err(|e| pm_forward::Error::Config {
            message: format!("invalid models response: {e}"),
        })?;
        if let Some(array) = value.get_mut("data").and_then(Value::as_array_mut) {
            for entry in array.iter_mut() {
                if let Some(object) = entry.as_object_mut() {
                    object.insert("tasks".to_string(), Value::from(tasks.clone()));
                }
            }
        }
        let rendered = serde_json::to_vec(&value).map_err(|e| pm_forward::Error::Config {
            message: format!("failed to serialize models response: {e}"),
        })?;
        Ok(Bytes::from(rendered))
    };

    let mutators = Mutators {
        request_body: &identity_body,
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
