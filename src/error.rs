//! Errors returned by the transport.

use thiserror::Error;

use crate::conn::dial::DialError;
use crate::conn::tunnel::TunnelError;
use crate::conn::ConnectionError;
use crate::handshake::HandshakeError;
use crate::BoxError;

/// Transport error type.
///
/// Each variant names the stage of the round trip which failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request target can't be sent, e.g. it has no host or an unsupported scheme.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request body could not be read.
    #[error("request body: {0}")]
    Body(#[source] BoxError),

    /// The proxy resolver failed.
    #[error("proxy resolution: {0}")]
    Proxy(#[source] BoxError),

    /// No connection could be established.
    #[error(transparent)]
    Dial(#[from] DialError),

    /// The `CONNECT` exchange with the proxy failed.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// Proxy authentication failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Writing the request or reading the response failed.
    #[error("io: {0}")]
    Io(#[source] hyper::Error),

    /// The connection was already closed.
    #[error("connection closed")]
    Closed,

    /// The round trip did not finish in time.
    #[error("request timeout")]
    Timeout,

    /// The destination requires TLS, but the transport has no TLS configuration.
    #[error("no TLS configuration for secure destination")]
    TlsNotConfigured,

    /// The TLS handshake failed.
    #[cfg(feature = "tls")]
    #[error("tls: {0}")]
    Tls(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Error::InvalidRequest(message.into())
    }

    /// Whether the error came from the network rather than from the request or
    /// from proxy authentication. Such errors may succeed when retried.
    pub fn is_network(&self) -> bool {
        match self {
            Error::Dial(_) | Error::Io(_) | Error::Closed | Error::Timeout => true,
            #[cfg(feature = "tls")]
            Error::Tls(_) => true,
            Error::Tunnel(TunnelError::Connection(_) | TunnelError::Upgrade(_)) => true,
            Error::Handshake(HandshakeError::Connection(_)) => true,
            _ => false,
        }
    }

    /// Whether the error is a proxy authentication failure.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Handshake(HandshakeError::Connection(_)) => false,
            Error::Handshake(_) => true,
            Error::Tunnel(error) => error.is_challenge(),
            _ => false,
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::Closed => Error::Closed,
            ConnectionError::Handshake(error) | ConnectionError::Io(error) => Error::Io(error),
        }
    }
}
