//! Proxy authentication handshakes.
//!
//! When a proxy answers with `407 Proxy Authentication Required`, the transport
//! hands the challenge, the request that provoked it and the live connection to a
//! [`Handshaker`]. The handshaker picks credentials for the challenged scheme,
//! sends the request again over the same connection and returns the new response.
//!
//! [`BasicProxyAuthorizer`] implements the `Basic` scheme. Other schemes can be
//! supported by implementing [`Handshaker`] without touching the transport.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::PROXY_AUTHENTICATE;
use http::{HeaderMap, Request, Response, StatusCode};
use hyper::body::Incoming;
use thiserror::Error;

use crate::conn::{Connection, ConnectionError};

mod basic;

pub use self::basic::BasicProxyAuthorizer;

/// Error type for proxy authentication handshakes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandshakeError {
    /// The response carried no `Proxy-Authenticate` challenge.
    #[error("no proxy authentication challenge")]
    MissingChallenge,

    /// None of the challenged schemes are supported.
    #[error("unsupported proxy authentication scheme: {0}")]
    UnsupportedScheme(String),

    /// The credentials can't be expressed in the challenged scheme.
    #[error("invalid proxy credentials")]
    InvalidCredentials,

    /// The proxy challenged the request again after credentials were sent.
    #[error("proxy rejected credentials: {status}")]
    Rejected {
        /// Status of the repeated challenge.
        status: StatusCode,
    },

    /// The challenge body is larger than the transport is willing to buffer.
    #[error("challenge body exceeds {limit} bytes")]
    ChallengeTooLarge {
        /// The configured limit.
        limit: usize,
    },

    /// The connection failed during the exchange.
    #[error("handshake connection: {0}")]
    Connection(#[source] ConnectionError),
}

/// A proxy authentication strategy.
///
/// `challenge` is the `407` response (with its body already read), `request` is the
/// request which was challenged, exactly as it was written to the connection, and
/// `connection` is the connection it was written to. Implementations send one
/// authorized copy of the request (see [`replay`]) and return the response to it.
pub trait Handshaker: fmt::Debug + Send + Sync {
    /// Answer a proxy authentication challenge.
    fn handshake<'a>(
        &'a self,
        challenge: &'a Response<Bytes>,
        request: &'a Request<Bytes>,
        connection: &'a mut Connection,
    ) -> BoxFuture<'a, Result<Response<Incoming>, HandshakeError>>;
}

impl<H> Handshaker for Arc<H>
where
    H: Handshaker + ?Sized,
{
    fn handshake<'a>(
        &'a self,
        challenge: &'a Response<Bytes>,
        request: &'a Request<Bytes>,
        connection: &'a mut Connection,
    ) -> BoxFuture<'a, Result<Response<Incoming>, HandshakeError>> {
        (**self).handshake(challenge, request, connection)
    }
}

/// Whether a response asks for proxy credentials.
pub fn is_challenge<B>(response: &Response<B>) -> bool {
    response.status() == StatusCode::PROXY_AUTHENTICATION_REQUIRED
}

/// Copy a buffered request so it can be sent again.
///
/// Method, URI, version, headers and body are copied. Extensions are not.
pub fn replay(request: &Request<Bytes>) -> Request<Bytes> {
    let mut replay = Request::new(request.body().clone());
    *replay.method_mut() = request.method().clone();
    *replay.uri_mut() = request.uri().clone();
    *replay.version_mut() = request.version();
    *replay.headers_mut() = request.headers().clone();
    replay
}

/// One authentication challenge from a `Proxy-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    scheme: String,
    params: Vec<(String, String)>,
    token: Option<String>,
}

impl Challenge {
    /// All challenges in the `Proxy-Authenticate` headers of a response.
    pub fn from_headers(headers: &HeaderMap) -> Vec<Challenge> {
        headers
            .get_all(PROXY_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Challenge::parse)
            .collect()
    }

    /// Parse one header value, which may hold several comma separated challenges.
    ///
    /// ```
    /// # use concord::handshake::Challenge;
    /// let challenges = Challenge::parse(r#"Basic realm="Access to some server""#);
    /// assert_eq!(challenges[0].scheme(), "Basic");
    /// assert_eq!(challenges[0].realm(), Some("Access to some server"));
    /// ```
    pub fn parse(value: &str) -> Vec<Challenge> {
        let mut challenges: Vec<Challenge> = Vec::new();

        for item in split_list(value) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }

            if let Some((name, value)) = auth_param(item) {
                if let Some(current) = challenges.last_mut() {
                    current.params.push((name, value));
                }
                continue;
            }

            let (scheme, rest) = match item.split_once(char::is_whitespace) {
                Some((scheme, rest)) => (scheme, rest.trim()),
                None => (item, ""),
            };

            let mut challenge = Challenge {
                scheme: scheme.to_owned(),
                params: Vec::new(),
                token: None,
            };
            if !rest.is_empty() {
                match auth_param(rest) {
                    Some(param) => challenge.params.push(param),
                    None => challenge.token = Some(rest.to_owned()),
                }
            }
            challenges.push(challenge);
        }

        challenges
    }

    /// The authentication scheme, as written by the proxy.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Whether this challenge names `scheme`, compared case-insensitively.
    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }

    /// Look up an auth-param by name, compared case-insensitively.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The `realm` auth-param.
    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    /// A `token68` value following the scheme, as used by e.g. `Negotiate`.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// Split a header list on commas which are not inside quoted strings.
fn split_list(value: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                items.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    items.push(&value[start..]);
    items
}

/// Parse `name=value` or `name="quoted value"`.
fn auth_param(item: &str) -> Option<(String, String)> {
    let (name, value) = item.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }

    let value = value.trim();
    if value.is_empty() || value.starts_with('=') {
        // token68 padding, not a parameter
        return None;
    }

    Some((name.to_owned(), unquote(value)))
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
    else {
        return value.to_owned();
    };

    let mut unquoted = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                unquoted.push(next);
            }
        } else {
            unquoted.push(c);
        }
    }
    unquoted
}
