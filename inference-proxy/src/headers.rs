use axum::http::HeaderMap;

pub const SECRET_ID_HEADER: &str = "privatemode-secret-id";
pub const VERSION_HEADER: &str = "privatemode-version";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The `Privatemode-Secret-ID` header identifying which session secret to
/// decrypt/encrypt this request with (§4.4). Gateway always sets it, but an
/// adapter must still cope with it being absent (§7's `Error::SecretNotFound`).
pub fn secret_id(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, SECRET_ID_HEADER)
}

/// The `Privatemode-Version` header driving `version::classify` (§4.5).
pub fn client_version(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, VERSION_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_secret_id_and_version() {
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_ID_HEADER, HeaderValue::from_static("s1"));
        headers.insert(VERSION_HEADER, HeaderValue::from_static("1.17.0"));
        assert_eq!(secret_id(&headers), Some("s1"));
        assert_eq!(client_version(&headers), Some("1.17.0"));
    }

    #[test]
    fn missing_headers_are_none() {
        let headers = HeaderMap::new();
        assert_eq!(secret_id(&headers), None);
        assert_eq!(client_version(&headers), None);
    }
}
