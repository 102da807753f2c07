//! The `Basic` proxy authentication scheme.

use std::fmt;

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::PROXY_AUTHORIZATION;
use http::{HeaderValue, Request, Response};
use hyper::body::Incoming;
use tracing::{debug, trace};

use super::{is_challenge, replay, Challenge, HandshakeError, Handshaker};
use crate::conn::Connection;

/// Answers `Basic` challenges with a fixed username and password.
///
/// The realm named by the proxy is not inspected.
#[derive(Clone)]
pub struct BasicProxyAuthorizer {
    username: String,
    password: String,
}

impl fmt::Debug for BasicProxyAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicProxyAuthorizer")
            .field("username", &self.username)
            .field("password", &crate::DebugLiteral("<redacted>"))
            .finish()
    }
}

impl BasicProxyAuthorizer {
    /// Create an authorizer for the given credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The configured username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The `Proxy-Authorization` value: `Basic <base64(username:password)>`.
    ///
    /// Fails with [`HandshakeError::InvalidCredentials`] when the username contains
    /// a colon, which the `Basic` scheme can't represent.
    pub fn authorization(&self) -> Result<HeaderValue, HandshakeError> {
        if self.username.contains(':') {
            return Err(HandshakeError::InvalidCredentials);
        }

        let credentials = BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut header = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|_| HandshakeError::InvalidCredentials)?;
        header.set_sensitive(true);
        Ok(header)
    }
}

impl Handshaker for BasicProxyAuthorizer {
    fn handshake<'a>(
        &'a self,
        challenge: &'a Response<Bytes>,
        request: &'a Request<Bytes>,
        connection: &'a mut Connection,
    ) -> BoxFuture<'a, Result<Response<Incoming>, HandshakeError>> {
        Box::pin(async move {
            let challenges = Challenge::from_headers(challenge.headers());
            if challenges.is_empty() {
                return Err(HandshakeError::MissingChallenge);
            }

            if !challenges.iter().any(|c| c.is_scheme("basic")) {
                let schemes = challenges
                    .iter()
                    .map(Challenge::scheme)
                    .collect::<Vec<_>>()
                    .join(", ");
                debug!(%schemes, "no basic challenge offered");
                return Err(HandshakeError::UnsupportedScheme(schemes));
            }

            let mut authorized = replay(request);
            authorized
                .headers_mut()
                .insert(PROXY_AUTHORIZATION, self.authorization()?);

            trace!(username = %self.username, "sending basic proxy credentials");
            let response = connection
                .send_request(authorized)
                .await
                .map_err(HandshakeError::Connection)?;

            if is_challenge(&response) {
                debug!("proxy rejected basic credentials");
                return Err(HandshakeError::Rejected {
                    status: response.status(),
                });
            }

            Ok(response)
        })
    }
}
