//! SSRF guard applied at the C2 fetch boundary.
//!
//! Every outbound fetch the pipeline makes is against a URL a caller
//! supplied (a feed URL, an item's page link for metadata extraction, an
//! enclosure URL for color extraction); none of it is a URL we chose.
//! Resolve-then-check here and nowhere else so C4/C5/C6/C8 all inherit
//! the guard uniformly just by going through [`super::http_client::FetchClient`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tokio::net::lookup_host;
use url::Url;

#[derive(Error, Debug)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL resolves to a private/internal IP address")]
    PrivateIpAddress,

    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),

    #[error("URL scheme not allowed: {0}")]
    InvalidScheme(String),
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    // 10.0.0.0/8
    if ip.octets()[0] == 10 {
        return true;
    }
    // 172.16.0.0/12
    if ip.octets()[0] == 172 && (16..=31).contains(&ip.octets()[1]) {
        return true;
    }
    // 192.168.0.0/16
    if ip.octets()[0] == 192 && ip.octets()[1] == 168 {
        return true;
    }
    // 169.254.0.0/16, includes the cloud metadata endpoint
    if ip.octets()[0] == 169 && ip.octets()[1] == 254 {
        return true;
    }
    // 0.0.0.0/8
    if ip.octets()[0] == 0 {
        return true;
    }
    // Documentation ranges: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
    if (ip.octets()[0] == 192 && ip.octets()[1] == 0 && ip.octets()[2] == 2)
        || (ip.octets()[0] == 198 && ip.octets()[1] == 51 && ip.octets()[2] == 100)
        || (ip.octets()[0] == 203 && ip.octets()[1] == 0 && ip.octets()[2] == 113)
    {
        return true;
    }
    false
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let segments = ip.segments();
    // fe80::/10
    if segments[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    // fc00::/7
    if segments[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    if let Some(ipv4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&ipv4);
    }
    false
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

/// Parses `url_str`, rejects non-http(s) schemes, resolves the host, and
/// rejects any resolved address that's private/internal. Called on every
/// fetch (not just once at registration time) so DNS rebinding between
/// validation and connection can't slip a private address through.
pub async fn validate_url(url_str: &str) -> Result<(), SsrfError> {
    let url = Url::parse(url_str).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(SsrfError::InvalidScheme(scheme.to_string())),
    }

    let host = url
        .host_str()
        .ok_or_else(|| SsrfError::InvalidUrl("no host in URL".to_string()))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let addrs: Vec<_> = lookup_host((host, port))
        .await
        .map_err(|e| SsrfError::DnsResolutionFailed(e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(SsrfError::DnsResolutionFailed(
            "no addresses resolved".to_string(),
        ));
    }

    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            tracing::warn!(
                url = url_str,
                ip = %addr.ip(),
                "ssrf guard blocked a private address"
            );
            return Err(SsrfError::PrivateIpAddress);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ipv4_ranges() {
        assert!(is_private_ipv4(&Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(172, 16, 0, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(172, 15, 0, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(192, 168, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(169, 254, 169, 254)));
    }

    #[test]
    fn public_ipv4_allowed() {
        assert!(!is_private_ipv4(&Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(1, 1, 1, 1)));
    }

    #[test]
    fn private_ipv6_ranges() {
        assert!(is_private_ipv6(&Ipv6Addr::LOCALHOST));
        assert!(is_private_ipv6(&Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)));
        assert!(is_private_ipv6(&Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 1)));
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let result = validate_url("file:///etc/passwd").await;
        assert!(matches!(result, Err(SsrfError::InvalidScheme(_))));
    }

    #[tokio::test]
    async fn rejects_unparseable_url() {
        let result = validate_url("not a url").await;
        assert!(matches!(result, Err(SsrfError::InvalidUrl(_))));
    }
}
