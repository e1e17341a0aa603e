//! Client IP resolution (spec §4.H).
//!
//! First nonempty of `CF-Connecting-IP`, the first element of
//! `X-Forwarded-For`, `X-Real-IP`, then the TCP peer address. Anonymized
//! per the configured `IpMode` before it ever reaches the analytics store.

use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;
use mtce_core::config::IpMode;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|s| !s.is_empty())
}

/// Resolve the client's address from proxy headers, falling back to the
/// TCP peer address of the connection.
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(v) = header_str(headers, "cf-connecting-ip") {
        if let Ok(ip) = v.parse() {
            return Some(ip);
        }
    }
    if let Some(v) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = v.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }
    if let Some(v) = header_str(headers, "x-real-ip") {
        if let Ok(ip) = v.parse() {
            return Some(ip);
        }
    }
    peer.map(|p| p.ip())
}

/// Apply the configured anonymization policy, returning the string form
/// stored in the analytics database (spec §4.H / §9 — anonymized mode
/// returns CIDR notation, not a bare address, matching the source).
pub fn apply_mode(ip: Option<IpAddr>, mode: IpMode) -> Option<String> {
    let ip = ip?;
    match mode {
        IpMode::Off => None,
        IpMode::Full => Some(ip.to_string()),
        IpMode::Anonymized => Some(anonymize(ip)),
    }
}

fn anonymize(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}::/64", seg[0], seg[1], seg[2], seg[3])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn prefers_cf_connecting_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(resolve(&headers, None), Some("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn falls_back_through_the_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("5.6.7.8, 10.0.0.1"));
        assert_eq!(resolve(&headers, None), Some("5.6.7.8".parse().unwrap()));

        let headers = HeaderMap::new();
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(resolve(&headers, Some(peer)), Some("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn anonymizes_v4_to_slash24() {
        let ip = "203.0.113.42".parse().unwrap();
        assert_eq!(apply_mode(Some(ip), IpMode::Anonymized), Some("203.0.113.0/24".to_string()));
    }

    #[test]
    fn off_mode_drops_ip_entirely() {
        let ip = "203.0.113.42".parse().unwrap();
        assert_eq!(apply_mode(Some(ip), IpMode::Off), None);
    }
}
