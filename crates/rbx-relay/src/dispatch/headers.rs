//! Outbound header sanitization.
//!
//! The relay deliberately forwards a minimal header set: hop-by-hop and
//! caller-identifying headers are stripped, and every outbound request
//! carries the same browser user-agent regardless of who called us.

use axum::http::header::{HeaderMap, HeaderValue, USER_AGENT};

/// Headers that must never reach the upstream.
///
/// `host` and `content-length` are rebuilt by the HTTP client;
/// `accept-encoding` is owned by the client's own compression negotiation;
/// the auth headers are the relay's secret, not the upstream's business;
/// `roblox-id` is an upstream-identity header callers must not forge.
const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "accept-encoding",
    "x-api-key",
    "authorization",
    "roblox-id",
];

/// Fixed outbound user-agent. Normalizes the relay's fingerprint so the
/// upstream sees one consistent client no matter who is behind the relay.
pub const OUTBOUND_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

/// Produce the outbound header set from the inbound one.
pub fn sanitize(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound.iter() {
        if STRIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        outbound.append(name, value.clone());
    }

    outbound.insert(USER_AGENT, HeaderValue::from_static(OUTBOUND_USER_AGENT));
    outbound
}
