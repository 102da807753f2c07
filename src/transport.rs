//! The proxy-aware transport.
//!
//! A [`Transport`] performs exactly one request over exactly one connection per
//! [`round_trip`][Transport::round_trip]:
//!
//! 1. The destination URI is validated and the request body is buffered, so the
//!    request can be sent again if a proxy asks for credentials.
//! 2. The [`ProxyResolver`] chooses between a direct connection and a proxy, and the
//!    chosen address is dialed.
//! 3. `https` destinations behind a proxy get a `CONNECT` tunnel, then TLS runs
//!    end-to-end through it. `https` destinations without a proxy run TLS directly.
//! 4. The request is written and the response head is read. A `407` response is
//!    handed to the [`Handshaker`], if one is configured, and its response is used
//!    instead.
//! 5. The connection is bound to the response body, see [`ConnectionBody`].

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::HOST;
use http::{HeaderValue, Request, Response, Uri, Version};
use http_body_util::{BodyExt as _, Limited};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, Instrument as _};

use crate::address::is_secure;
use crate::body::{wrap, ConnectionBody};
use crate::conn::dial::{acquire, Acquired};
use crate::conn::{tunnel, Connection, ConnectionError};
use crate::error::Error;
use crate::handshake::{is_challenge, replay, HandshakeError, Handshaker};
use crate::proxy::{NoProxy, ProxyResolver};
use crate::BoxError;

/// Timeouts and socket options for a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The timeout for connecting to the destination or proxy.
    pub connect_timeout: Option<Duration>,

    /// The timeout for the whole round trip, up to the response head.
    pub timeout: Option<Duration>,

    /// The idle time before TCP keep-alive probes are sent.
    pub keep_alive: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,

    /// The largest `407` body buffered before a handshake.
    pub max_challenge_body: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            timeout: None,
            keep_alive: Some(Duration::from_secs(90)),
            nodelay: true,
            max_challenge_body: 64 * 1024,
        }
    }
}

struct TransportRef {
    proxy: Box<dyn ProxyResolver>,
    handshaker: Option<Box<dyn Handshaker>>,
    config: TransportConfig,
    http1: http1::Builder,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

/// An HTTP/1.1 transport which can route requests through a forward proxy.
///
/// The transport holds only immutable configuration, so it is cheap to clone and
/// can serve any number of concurrent round trips.
///
/// # Example
/// ```no_run
/// # use concord::Transport;
/// # use concord::proxy::EnvProxy;
/// # async fn run() -> Result<(), concord::Error> {
/// let transport = Transport::builder()
///     .with_proxy(EnvProxy::from_env())
///     .with_default_tls()
///     .build();
///
/// let request = http::Request::get("https://example.com/")
///     .body(http_body_util::Empty::<bytes::Bytes>::new())
///     .unwrap();
/// let mut response = transport.round_trip(request).await?;
/// response.body_mut().close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportRef>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("proxy", &self.inner.proxy)
            .field("handshaker", &self.inner.handshaker)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Builder::default().build()
    }
}

impl Transport {
    /// Create a new, empty builder for transports.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// A transport which connects directly and does not answer proxy challenges.
    pub fn new() -> Self {
        Self::default()
    }

    /// The transport's timeouts and socket options.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Send one request and return its response.
    ///
    /// The returned body owns the connection. Close or drop it to close the connection.
    pub async fn round_trip<B>(&self, request: Request<B>) -> Result<Response<ConnectionBody>, Error>
    where
        B: http_body::Body,
        B::Error: Into<BoxError>,
    {
        let span = tracing::debug_span!("round_trip", method = %request.method(), uri = %request.uri());
        let exchange = self.exchange(request).instrument(span);

        match self.inner.config.timeout {
            Some(dur) => match tokio::time::timeout(dur, exchange).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(timeout = ?dur, "round trip timed out");
                    Err(Error::Timeout)
                }
            },
            None => exchange.await,
        }
    }

    async fn exchange<B>(&self, request: Request<B>) -> Result<Response<ConnectionBody>, Error>
    where
        B: http_body::Body,
        B::Error: Into<BoxError>,
    {
        let destination = request.uri().clone();
        validate(&destination)?;

        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|error| Error::Body(error.into()))?
            .to_bytes();
        let request = Request::from_parts(parts, body);

        let Acquired {
            stream,
            proxy,
            address,
        } = acquire(&destination, self.inner.proxy.as_ref(), &self.inner.config).await?;

        let secure = is_secure(&destination);
        let mut connection = match (proxy.is_some(), secure) {
            (true, true) => {
                let mut proxy_connection = Connection::handshake(&self.inner.http1, stream).await?;
                match self.tunnel(&mut proxy_connection, &address).await? {
                    Tunnel::Open(upgraded) => {
                        drop(proxy_connection);
                        self.secure(TokioIo::new(upgraded), &destination).await?
                    }
                    Tunnel::Challenged(response) => return Ok(wrap(proxy_connection, response)),
                }
            }
            (false, true) => self.secure(stream, &destination).await?,
            (_, false) => Connection::handshake(&self.inner.http1, stream).await?,
        };

        let request = prepare(request, proxy.is_some() && !secure);
        let response = connection.send_request(replay(&request)).await?;
        let response = self
            .authenticate(response, &request, &mut connection)
            .await?;

        trace!(status = %response.status(), "round trip complete");
        Ok(wrap(connection, response))
    }

    /// Open a `CONNECT` tunnel to `address` over the proxy connection.
    async fn tunnel(&self, connection: &mut Connection, address: &str) -> Result<Tunnel, Error> {
        let connect = tunnel::connect_request(address)?;
        let response = tunnel::send(connection, replay(&connect)).await?;

        if is_challenge(&response) && self.inner.handshaker.is_none() {
            debug!("tunnel requires proxy authentication");
            return Ok(Tunnel::Challenged(response));
        }

        let response = self.authenticate(response, &connect, connection).await?;
        Ok(Tunnel::Open(tunnel::open(response).await?))
    }

    /// Answer a proxy challenge with the handshaker, if there is both.
    async fn authenticate(
        &self,
        response: Response<Incoming>,
        request: &Request<Bytes>,
        connection: &mut Connection,
    ) -> Result<Response<Incoming>, Error> {
        let handshaker = match &self.inner.handshaker {
            Some(handshaker) if is_challenge(&response) => handshaker,
            _ => return Ok(response),
        };

        debug!("proxy authentication required");
        let challenge = drain(response, self.inner.config.max_challenge_body).await?;
        let response = handshaker
            .handshake(&challenge, request, connection)
            .await?;

        if is_challenge(&response) {
            return Err(HandshakeError::Rejected {
                status: response.status(),
            }
            .into());
        }

        Ok(response)
    }

    #[cfg(feature = "tls")]
    async fn secure<IO>(&self, stream: IO, destination: &Uri) -> Result<Connection, Error>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let config = self.inner.tls.clone().ok_or(Error::TlsNotConfigured)?;
        let host = destination
            .host()
            .ok_or_else(|| Error::invalid("missing host"))?;

        let stream = crate::tls::connect(config, host, stream)
            .await
            .map_err(Error::Tls)?;
        Ok(Connection::handshake(&self.inner.http1, stream).await?)
    }

    #[cfg(not(feature = "tls"))]
    async fn secure<IO>(&self, _stream: IO, _destination: &Uri) -> Result<Connection, Error>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Err(Error::TlsNotConfigured)
    }
}

enum Tunnel {
    Open(Upgraded),
    Challenged(Response<Incoming>),
}

impl<B> tower::Service<Request<B>> for Transport
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<ConnectionBody>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { transport.round_trip(request).await })
    }
}

fn validate(uri: &Uri) -> Result<(), Error> {
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(scheme) => return Err(Error::invalid(format!("unsupported scheme: {scheme}"))),
        None => return Err(Error::invalid("missing scheme")),
    }

    if uri.host().map_or(true, str::is_empty) {
        return Err(Error::invalid("missing host"));
    }

    Ok(())
}

/// Shape a request for the wire.
///
/// Requests sent in the clear to a proxy keep their absolute-form target, so the
/// proxy sees the destination URI untouched. Everything else is sent in
/// origin-form. `Host` is filled in from the URI when missing.
fn prepare(mut request: Request<Bytes>, absolute: bool) -> Request<Bytes> {
    let uri = request.uri().clone();

    if !request.headers().contains_key(HOST) {
        if let Some(host) = uri.host() {
            let host = match uri.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_owned(),
            };
            if let Ok(value) = HeaderValue::from_str(&host) {
                request.headers_mut().insert(HOST, value);
            }
        }
    }

    if !absolute {
        *request.uri_mut() = uri
            .path_and_query()
            .cloned()
            .map(Uri::from)
            .unwrap_or_else(|| Uri::from_static("/"));
    }

    if request.version() != Version::HTTP_10 {
        *request.version_mut() = Version::HTTP_11;
    }

    request
}

/// Read a challenge body so the connection is ready for the next request.
async fn drain(response: Response<Incoming>, limit: usize) -> Result<Response<Bytes>, HandshakeError> {
    let (parts, body) = response.into_parts();
    let body = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|error| match error.downcast::<hyper::Error>() {
            Ok(error) => HandshakeError::Connection(ConnectionError::Io(*error)),
            Err(_) => HandshakeError::ChallengeTooLarge { limit },
        })?
        .to_bytes();
    Ok(Response::from_parts(parts, body))
}

/// Builder for a [`Transport`].
#[derive(Debug)]
pub struct Builder {
    proxy: Box<dyn ProxyResolver>,
    handshaker: Option<Box<dyn Handshaker>>,
    config: TransportConfig,
    http1: http1::Builder,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            proxy: Box::new(NoProxy),
            handshaker: None,
            config: TransportConfig::default(),
            http1: http1::Builder::new(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl Builder {
    /// Set the proxy resolver.
    pub fn with_proxy<P>(mut self, proxy: P) -> Self
    where
        P: ProxyResolver + 'static,
    {
        self.proxy = Box::new(proxy);
        self
    }

    /// Set the handshaker used to answer `407` challenges.
    pub fn with_handshaker<H>(mut self, handshaker: H) -> Self
    where
        H: Handshaker + 'static,
    {
        self.handshaker = Some(Box::new(handshaker));
        self
    }

    /// Access the transport configuration.
    pub fn config(&mut self) -> &mut TransportConfig {
        &mut self.config
    }

    /// Set the transport configuration.
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Access the HTTP/1.1 protocol configuration.
    pub fn http1(&mut self) -> &mut http1::Builder {
        &mut self.http1
    }

    /// Use `config` for TLS to `https` destinations.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Use the platform's native certificates for TLS to `https` destinations.
    #[cfg(feature = "tls")]
    pub fn with_default_tls(self) -> Self {
        self.with_tls(Arc::new(crate::tls::default_tls_config()))
    }

    /// Build the transport.
    pub fn build(self) -> Transport {
        Transport {
            inner: Arc::new(TransportRef {
                proxy: self.proxy,
                handshaker: self.handshaker,
                config: self.config,
                http1: self.http1,
                #[cfg(feature = "tls")]
                tls: self.tls,
            }),
        }
    }
}
