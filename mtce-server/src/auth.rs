//! Admin auth-token extraction and validation (spec §4.H).
//!
//! MTCE does not itself own credentials: a present token is forwarded to
//! the Backend's share-list endpoint, and a 401/403 there becomes 401
//! here. This module only extracts the token from the request; the
//! indirect validation call lives in `mtce_core::backend`.

use http::HeaderMap;

/// First present of the configured admin token header (`X-Auth` by
/// default, see `MTCE_ADMIN_TOKEN_HEADER`), `Authorization: Bearer ...`,
/// or cookie `auth`. Trimmed of surrounding whitespace.
pub fn extract_token(headers: &HeaderMap, header_name: &str) -> Option<String> {
    if let Some(v) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    if let Some(v) = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(rest) = v.strip_prefix("Bearer ") {
            let rest = rest.trim();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(http::header::COOKIE).and_then(|v| v.to_str().ok()) {
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix("auth=") {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn prefers_x_auth_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-auth", HeaderValue::from_static("tok-a"));
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer tok-b"));
        assert_eq!(extract_token(&headers, "x-auth"), Some("tok-a".to_string()));
    }

    #[test]
    fn falls_back_to_bearer_then_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer tok-b"));
        assert_eq!(extract_token(&headers, "x-auth"), Some("tok-b".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(http::header::COOKIE, HeaderValue::from_static("other=1; auth=tok-c; x=2"));
        assert_eq!(extract_token(&headers, "x-auth"), Some("tok-c".to_string()));
    }

    #[test]
    fn absent_when_nothing_present() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, "x-auth"), None);
    }

    #[test]
    fn honors_configured_header_name() {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom-admin-token", HeaderValue::from_static("tok-d"));
        assert_eq!(extract_token(&headers, "x-custom-admin-token"), Some("tok-d".to_string()));
        assert_eq!(extract_token(&headers, "x-auth"), None);
    }
}
