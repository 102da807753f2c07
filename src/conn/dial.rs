//! Acquiring TCP connections to a destination or its proxy.

use std::io;

use http::Uri;
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::address::canonical_address;
use crate::error::Error;
use crate::proxy::ProxyResolver;
use crate::transport::TransportConfig;

/// Error type for TCP connections.
#[derive(Debug, Error)]
#[error("dial {address}: {source}")]
pub struct DialError {
    address: String,
    #[source]
    source: io::Error,
}

impl DialError {
    fn msg(address: &str) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self {
            address: address.to_owned(),
            source,
        }
    }

    /// The `host:port` address which could not be reached.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the connection attempt timed out.
    pub fn is_timeout(&self) -> bool {
        self.source.kind() == io::ErrorKind::TimedOut
    }
}

/// A freshly dialed stream, and what it is connected to.
#[derive(Debug)]
pub struct Acquired {
    /// The open TCP stream.
    pub stream: TcpStream,

    /// The proxy the stream is connected to, if any.
    pub proxy: Option<Uri>,

    /// Canonical address of the request's destination.
    pub address: String,
}

/// Open a TCP connection for a request to `uri`.
///
/// When the resolver names a proxy, the proxy's canonical address is dialed,
/// otherwise the destination's. A single attempt is made.
pub async fn acquire(
    uri: &Uri,
    resolver: &dyn ProxyResolver,
    config: &TransportConfig,
) -> Result<Acquired, Error> {
    let address = canonical_address(uri).ok_or_else(|| Error::invalid("missing host"))?;
    let proxy = resolver.resolve(uri).map_err(Error::Proxy)?;

    let target = match &proxy {
        Some(proxy) => {
            debug!(%proxy, "using proxy");
            match proxy.scheme_str() {
                None | Some("http") => {}
                Some(scheme) => {
                    return Err(Error::Proxy(
                        format!("unsupported proxy scheme: {scheme}").into(),
                    ))
                }
            }
            canonical_address(proxy)
                .ok_or_else(|| Error::Proxy(format!("proxy has no address: {proxy}").into()))?
        }
        None => address.clone(),
    };

    let stream = dial(&target, config).await?;
    Ok(Acquired {
        stream,
        proxy,
        address,
    })
}

/// Connect to a `host:port` address, honoring the connect timeout and socket options.
#[tracing::instrument(skip(config), level = "debug")]
pub async fn dial(address: &str, config: &TransportConfig) -> Result<TcpStream, DialError> {
    let connect = TcpStream::connect(address);
    let stream = match config.connect_timeout {
        Some(dur) => match tokio::time::timeout(dur, connect).await {
            Ok(result) => result,
            Err(elapsed) => {
                trace!(timeout=?dur, "connection timed out");
                Err(io::Error::new(io::ErrorKind::TimedOut, elapsed))
            }
        },
        None => connect.await,
    }
    .map_err(DialError::msg(address))?;

    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("tcp set_nodelay error: {}", e);
        }
    }

    if let Some(dur) = config.keep_alive {
        let conf = TcpKeepalive::new().with_time(dur);
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&conf) {
            warn!("tcp set_keepalive error: {}", e);
        }
    }

    if let Ok(peer_addr) = stream.peer_addr() {
        trace!(peer.addr = %peer_addr, "tcp connected");
    } else {
        trace!("tcp connected");
    }

    Ok(stream)
}
