//! Canonical `host:port` addresses for dialing and tunneling.

use http::Uri;

/// Produce the canonical `host:port` address for a URI.
///
/// An explicit port is always used verbatim. Otherwise the port is chosen from the
/// scheme: `http` and `ws` use port 80, `https` and `wss` use port 443. The host is
/// passed through unchanged, so IPv4 literals stay as written and IPv6 literals keep
/// their brackets.
///
/// Returns `None` when the URI has no host, or has no port and a scheme without a
/// known default.
///
/// ```
/// # use concord::address::canonical_address;
/// let uri = "https://127.0.0.1".parse().unwrap();
/// assert_eq!(canonical_address(&uri).as_deref(), Some("127.0.0.1:443"));
/// ```
pub fn canonical_address(uri: &Uri) -> Option<String> {
    let host = uri.host()?;
    let port = match uri.port_u16() {
        Some(port) => port,
        None => default_port(uri)?,
    };

    Some(format!("{host}:{port}"))
}

/// Whether the URI names an encrypted destination.
pub fn is_secure(uri: &Uri) -> bool {
    matches!(uri.scheme_str(), Some("https") | Some("wss"))
}

fn default_port(uri: &Uri) -> Option<u16> {
    match uri.scheme_str()? {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}
