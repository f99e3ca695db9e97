//! Client-IP derivation for handlers that don't carry an explicit
//! `ip_address` field in their body (tarpit and encrypted-cookie
//! verification), mirroring the precedence the request analyzer uses for
//! the main decision pipeline: `X-Forwarded-For` first entry, then
//! `X-Real-IP`, then the socket's remote address.

use axum::http::HeaderMap;
use std::net::SocketAddr;

pub fn derive(headers: &HeaderMap, remote: SocketAddr) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(candidate) = xff.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return candidate.to_string();
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let candidate = real_ip.trim();
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    remote.ip().to_string()
}
