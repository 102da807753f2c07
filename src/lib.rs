//! Concord
//!
//! A single-shot HTTP/1.1 transport which knows how to talk to forward proxies.
//!
//! The [`Transport`] resolves a destination to a connection (directly, or through
//! a proxy chosen by a [`ProxyResolver`]), opens a `CONNECT` tunnel for `https`
//! destinations, answers `407 Proxy Authentication Required` challenges with a
//! pluggable [`Handshaker`], and hands the connection over to the response body
//! so that closing the body closes the connection.
//!
//! ```no_run
//! # use concord::{Transport, handshake::BasicProxyAuthorizer, proxy::FixedProxy};
//! # async fn run() -> Result<(), concord::Error> {
//! let transport = Transport::builder()
//!     .with_proxy(FixedProxy::new("http://proxy.internal:3128".parse().unwrap()))
//!     .with_handshaker(BasicProxyAuthorizer::new("user", "secret"))
//!     .build();
//!
//! let request = http::Request::get("http://example.com/")
//!     .body(http_body_util::Empty::<bytes::Bytes>::new())
//!     .unwrap();
//! let response = transport.round_trip(request).await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;

pub mod address;
pub mod body;
pub mod conn;
pub mod error;
pub mod handshake;
pub mod proxy;
#[cfg(feature = "tls")]
pub mod tls;
pub mod transport;

pub use self::body::ConnectionBody;
pub use self::error::Error;
pub use self::handshake::Handshaker;
pub use self::proxy::ProxyResolver;
pub use self::transport::{Transport, TransportConfig};

/// A boxed, thread-safe error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
