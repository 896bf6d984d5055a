//! Client IP resolution behind a trusted proxy edge.
//!
//! Precedence: CDN connecting-IP header, then the reverse proxy's real-IP
//! header, then the first hop of the forwarded-for chain, then the raw
//! transport peer, finally a sentinel.  The first three are spoofable unless
//! the deployment's edge strips and re-sets them -- this function assumes a
//! trusted proxy topology and does not try to validate header authenticity.

use std::net::IpAddr;

use http::HeaderMap;

/// Set by CDNs (Cloudflare convention) at the outermost edge.
const CDN_CONNECTING_IP: &str = "cf-connecting-ip";
/// Set by the reverse proxy directly in front of the application.
const REAL_IP: &str = "x-real-ip";
/// Comma-separated hop chain; the leftmost entry is the original client.
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Returned when no source yields a parseable address.
pub const UNKNOWN_IP: &str = "unknown";

/// Resolve the client address from proxy headers, falling back to the
/// transport-level peer and finally [`UNKNOWN_IP`].
///
/// Header candidates that do not parse as an IP address are skipped rather
/// than trusted verbatim.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    if let Some(ip) = header_ip(headers, CDN_CONNECTING_IP) {
        return ip.to_string();
    }

    if let Some(ip) = header_ip(headers, REAL_IP) {
        return ip.to_string();
    }

    if let Some(value) = header_str(headers, FORWARDED_FOR) {
        if let Some(first) = value.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip.to_string();
            }
        }
    }

    if let Some(peer) = peer {
        return peer.to_string();
    }

    UNKNOWN_IP.to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    header_str(headers, name).and_then(|v| v.trim().parse().ok())
}
