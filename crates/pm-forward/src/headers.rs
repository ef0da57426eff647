use http::{HeaderMap, HeaderName, HeaderValue, Uri};

use crate::error::Error;

/// Headers that apply only to a single hop and must never be copied through
/// a proxy (§4.2 step 1 and step 6).
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Append `addr` to the comma-separated `X-Forwarded-For` chain, creating
/// the header if absent (§4.2 step 2).
pub fn append_forwarded_for(headers: &mut HeaderMap, addr: &str) {
    const NAME: &str = "x-forwarded-for";
    let updated = match headers.get(NAME).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {addr}"),
        _ => addr.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&updated) {
        headers.insert(HeaderName::from_static(NAME), value);
    }
}

/// Rewrite `original`'s host and scheme to `upstream`'s, keeping path and
/// query untouched (§4.2 step 3).
pub fn rewrite_to_upstream(original: &Uri, upstream: &Uri) -> Result<Uri, Error> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let authority = upstream.authority().ok_or_else(|| Error::Config {
        message: "upstream URI has no authority".to_string(),
    })?;
    let scheme = upstream.scheme().ok_or_else(|| Error::Config {
        message: "upstream URI has no scheme".to_string(),
    })?;

    Uri::builder()
        .scheme(scheme.clone())
        .authority(authority.clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| Error::Config {
            message: format!("failed to build upstream URI: {e}"),
        })
}

/// Remove `Content-Length`, which mutation may have invalidated, before
/// copying response headers downstream (§4.2 step 8).
pub fn strip_content_length(headers: &mut HeaderMap) {
    headers.remove(http::header::CONTENT_LENGTH);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_all_listed_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        for name in HOP_BY_HOP {
            headers.insert(HeaderName::from_bytes(name.as_bytes()).unwrap(), HeaderValue::from_static("x"));
        }
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("authorization"));
    }

    #[test]
    fn forwarded_for_chains_onto_existing_value() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.1.1.1"));
        append_forwarded_for(&mut headers, "2.2.2.2");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "1.1.1.1, 2.2.2.2");
    }

    #[test]
    fn forwarded_for_creates_header_when_absent() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "3.3.3.3");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "3.3.3.3");
    }

    #[test]
    fn rewrite_preserves_path_and_query_swaps_authority() {
        let original: Uri = "https://gateway.local/v1/chat/completions?x=1".parse().unwrap();
        let upstream: Uri = "https://api.privatemode.ai".parse().unwrap();
        let rewritten = rewrite_to_upstream(&original, &upstream).unwrap();
        assert_eq!(rewritten.to_string(), "https://api.privatemode.ai/v1/chat/completions?x=1");
    }
}
