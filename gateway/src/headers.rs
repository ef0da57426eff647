use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;

use crate::config::ClientKind;

/// The `Privatemode-Version` wire-protocol version this gateway speaks,
/// distinct from its own crate version: it only needs to track the
/// thresholds the inference proxy's adapters branch on (§4.5).
pub const GATEWAY_VERSION: &str = "1.17.0";

/// Request-scoped values needed to inject the §4.4 header set. Constructed
/// once per request and reused across retry attempts (with `attempt` bumped).
pub struct HeaderContext<'a> {
    pub bearer_token: Option<&'a str>,
    pub client_kind: ClientKind,
    pub secret_id: &'a str,
    pub secret_key: &'a [u8; 32],
    pub request_id: &'a str,
    pub attempt: u32,
    pub ocsp_allow_statuses: &'a [&'a str],
    pub ocsp_not_before_unix: i64,
}

fn header(name: &'static str, value: String) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(name),
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("")),
    )
}

/// Builds the `Privatemode-NVIDIA-OCSP-Policy` header value (§6) and its
/// HMAC-SHA256 MAC, keyed on the first 32 bytes of the active secret (§4.4).
pub fn ocsp_policy_header(allow_statuses: &[&str], not_before_unix: i64, secret_key: &[u8; 32]) -> (String, String) {
    let value = format!("rules={}; revocation-time-not-before={not_before_unix}", allow_statuses.join(","));
    let mut mac = <Hmac<Sha256>>::new_from_slice(secret_key).expect("HMAC accepts any key length");
    mac.update(value.as_bytes());
    let mac_hex = hex::encode(mac.finalize().into_bytes());
    (value, mac_hex)
}

/// Inject the §4.4 header set into an outgoing request. `Authorization` is
/// only set if the caller did not already supply one.
pub fn inject_headers(headers: &mut HeaderMap, ctx: &HeaderContext<'_>) {
    if let Some(token) = ctx.bearer_token {
        if !headers.contains_key(http::header::AUTHORIZATION) {
            let (name, value) = header("authorization", format!("Bearer {token}"));
            headers.insert(name, value);
        }
    }

    let (name, value) = header("privatemode-version", GATEWAY_VERSION.to_string());
    headers.insert(name, value);
    let (name, value) = header("privatemode-os", std::env::consts::OS.to_string());
    headers.insert(name, value);
    let (name, value) = header("privatemode-architecture", std::env::consts::ARCH.to_string());
    headers.insert(name, value);
    let (name, value) = header("privatemode-client", ctx.client_kind.header_value().to_string());
    headers.insert(name, value);
    let (name, value) = header("privatemode-secret-id", ctx.secret_id.to_string());
    headers.insert(name, value);

    let (policy, mac) = ocsp_policy_header(ctx.ocsp_allow_statuses, ctx.ocsp_not_before_unix, ctx.secret_key);
    let (name, value) = header("privatemode-nvidia-ocsp-policy", policy);
    headers.insert(name, value);
    let (name, value) = header("privatemode-nvidia-ocsp-policy-mac", mac);
    headers.insert(name, value);

    let (name, value) = header("x-request-id", format!("{}_{}", ctx.request_id, ctx.attempt));
    headers.insert(name, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_overwrite_caller_supplied_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer caller"));
        let ctx = HeaderContext {
            bearer_token: Some("configured"),
            client_kind: ClientKind::App,
            secret_id: "s1",
            secret_key: &[0u8; 32],
            request_id: "proxy_abc",
            attempt: 1,
            ocsp_allow_statuses: &["allow-good"],
            ocsp_not_before_unix: 0,
        };
        inject_headers(&mut headers, &ctx);
        assert_eq!(headers.get(http::header::AUTHORIZATION).unwrap(), "Bearer caller");
    }

    #[test]
    fn request_id_includes_attempt_number() {
        let mut headers = HeaderMap::new();
        let ctx = HeaderContext {
            bearer_token: None,
            client_kind: ClientKind::App,
            secret_id: "s1",
            secret_key: &[0u8; 32],
            request_id: "proxy_abc",
            attempt: 3,
            ocsp_allow_statuses: &["allow-good"],
            ocsp_not_before_unix: 0,
        };
        inject_headers(&mut headers, &ctx);
        assert_eq!(headers.get("x-request-id").unwrap(), "proxy_abc_3");
    }

    #[test]
    fn ocsp_mac_is_deterministic_for_fixed_key_and_value() {
        let (value_a, mac_a) = ocsp_policy_header(&["allow-good", "allow-unknown"], 100, &[1u8; 32]);
        let (value_b, mac_b) = ocsp_policy_header(&["allow-good", "allow-unknown"], 100, &[1u8; 32]);
        assert_eq!(value_a, value_b);
        assert_eq!(mac_a, mac_b);
        let (_, mac_c) = ocsp_policy_header(&["allow-good", "allow-unknown"], 100, &[2u8; 32]);
        assert_ne!(mac_a, mac_c);
    }
}
