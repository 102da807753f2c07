//! `CONNECT` tunnels through a forward proxy.
//!
//! The tunnel is opened with a `CONNECT host:port HTTP/1.1` request carrying a
//! matching `Host` header. A `2xx` response hands the raw stream back to the
//! caller, who is expected to run TLS over it. Any other status is reported as
//! [`TunnelError::Refused`], including `407` challenges, which callers can retry
//! with credentials over the same connection before [opening][open] the tunnel.

use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use thiserror::Error;
use tracing::trace;

use super::{Connection, ConnectionError};

/// Error type for `CONNECT` exchanges.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TunnelError {
    /// The tunnel address is not a valid `host:port` authority.
    #[error("invalid tunnel address: {0}")]
    InvalidAddress(String),

    /// The proxy answered the `CONNECT` with a non-success status.
    #[error("proxy refused tunnel: {status}")]
    Refused {
        /// Status returned by the proxy.
        status: StatusCode,
        /// Headers returned by the proxy.
        headers: HeaderMap,
    },

    /// The `CONNECT` request could not be exchanged.
    #[error("tunnel request: {0}")]
    Connection(#[source] ConnectionError),

    /// The proxy accepted the tunnel, but the stream could not be taken over.
    #[error("tunnel upgrade: {0}")]
    Upgrade(#[source] hyper::Error),
}

impl TunnelError {
    /// Whether the proxy answered, but refused to open the tunnel.
    pub fn is_refused(&self) -> bool {
        matches!(self, TunnelError::Refused { .. })
    }

    /// Whether the proxy refused the tunnel with an authentication challenge.
    pub fn is_challenge(&self) -> bool {
        matches!(
            self,
            TunnelError::Refused { status, .. } if *status == StatusCode::PROXY_AUTHENTICATION_REQUIRED
        )
    }

    /// The status returned by the proxy, if it refused the tunnel.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TunnelError::Refused { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The headers returned by the proxy, if it refused the tunnel.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            TunnelError::Refused { headers, .. } => Some(headers),
            _ => None,
        }
    }
}

/// Build the `CONNECT` request for a canonical `host:port` address.
pub fn connect_request(address: &str) -> Result<Request<Bytes>, TunnelError> {
    let invalid = || TunnelError::InvalidAddress(address.to_owned());

    let uri: Uri = address.parse().map_err(|_| invalid())?;
    if uri.scheme().is_some() || uri.port().is_none() {
        return Err(invalid());
    }
    let host = HeaderValue::from_str(address).map_err(|_| invalid())?;

    Request::builder()
        .method(Method::CONNECT)
        .uri(uri)
        .version(Version::HTTP_11)
        .header(HOST, host)
        .body(Bytes::new())
        .map_err(|_| invalid())
}

/// Write a `CONNECT` request over the proxy connection and read the response head.
pub async fn send(
    connection: &mut Connection,
    request: Request<Bytes>,
) -> Result<Response<Incoming>, TunnelError> {
    trace!(address = %request.uri(), "requesting tunnel");
    connection
        .send_request(request)
        .await
        .map_err(TunnelError::Connection)
}

/// Take over the raw stream once the proxy has accepted the tunnel.
///
/// The stream is returned unmodified, ready for a TLS handshake.
pub async fn open(response: Response<Incoming>) -> Result<Upgraded, TunnelError> {
    let status = response.status();
    if !status.is_success() {
        trace!(%status, "tunnel refused");
        return Err(TunnelError::Refused {
            status,
            headers: response.headers().clone(),
        });
    }

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(TunnelError::Upgrade)?;
    trace!(%status, "tunnel established");
    Ok(upgraded)
}

/// Open a tunnel to `address` without answering authentication challenges.
pub async fn establish(
    connection: &mut Connection,
    address: &str,
) -> Result<Upgraded, TunnelError> {
    let request = connect_request(address)?;
    let response = send(connection, request).await?;
    open(response).await
}
