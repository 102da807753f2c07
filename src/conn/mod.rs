//! Client connection types.
//!
//! A round trip owns exactly one [`Connection`]. The connection is established by
//! [dialing][dial] a TCP stream, optionally [tunneling][tunnel] through a proxy and
//! wrapping the tunnel in TLS, and finally running the HTTP/1.1 handshake over
//! whatever stream results.
//!
//! Once the response has been read, the connection is handed to the response
//! body (see [`crate::body`]), which closes it when the body is closed or dropped.

use std::fmt;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::trace;

pub mod dial;
pub mod tunnel;

/// Error type for a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was closed before the operation.
    #[error("connection closed")]
    Closed,

    /// The HTTP/1.1 handshake failed.
    #[error("handshake: {0}")]
    Handshake(#[source] hyper::Error),

    /// Writing a request or reading a response failed.
    #[error("http: {0}")]
    Io(#[source] hyper::Error),
}

/// An HTTP/1.1 connection to a server or proxy.
///
/// Requests are sent one after another; the connection is never shared between
/// two owners. Closing is explicit and idempotent, and every send checks the
/// closed flag first so a torn-down connection can never be reused.
pub struct Connection {
    sender: Option<http1::SendRequest<Full<Bytes>>>,
    driver: Option<JoinHandle<()>>,
    closed: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.closed)
            .finish()
    }
}

impl Connection {
    /// Run the HTTP/1.1 handshake over `stream` and spawn the connection driver.
    ///
    /// The driver supports upgrades, so a `CONNECT` response can take over the stream.
    pub async fn handshake<IO>(builder: &http1::Builder, stream: IO) -> Result<Self, ConnectionError>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        trace!("handshake h1");
        let (sender, conn) = builder
            .handshake(TokioIo::new(stream))
            .await
            .map_err(ConnectionError::Handshake)?;

        let driver = tokio::spawn(async {
            if let Err(err) = conn.with_upgrades().await {
                if err.is_user() {
                    tracing::error!(%err, "h1 connection driver error");
                } else {
                    tracing::debug!(%err, "h1 connection driver error");
                }
            }
        });
        trace!("handshake complete");

        Ok(Self {
            sender: Some(sender),
            driver: Some(driver),
            closed: false,
        })
    }

    /// Write a request and read the response head.
    ///
    /// Fails with [`ConnectionError::Closed`] once the connection has been closed.
    pub async fn send_request(
        &mut self,
        request: Request<Bytes>,
    ) -> Result<Response<Incoming>, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }

        let sender = self.sender.as_mut().ok_or(ConnectionError::Closed)?;
        sender.ready().await.map_err(ConnectionError::Io)?;

        trace!(method = %request.method(), uri = %request.uri(), "sending request");
        let response = sender
            .send_request(request.map(Full::new))
            .await
            .map_err(ConnectionError::Io)?;
        trace!(status = %response.status(), "received response");
        Ok(response)
    }

    /// Close the connection, dropping the underlying stream.
    ///
    /// Closing an already closed connection does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sender.take();
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        trace!("connection closed");
    }

    /// Whether [`close`][Connection::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;
    use tokio::net::{TcpListener, TcpStream};

    assert_impl_all!(Connection: Send);

    async fn serve_hello(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let service = hyper::service::service_fn(|_req: Request<Incoming>| async {
            Ok::<_, std::convert::Infallible>(Response::new(Full::new(Bytes::from_static(
                b"hello",
            ))))
        });
        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await;
    }

    fn get() -> Request<Bytes> {
        Request::get("/")
            .header(http::header::HOST, "localhost")
            .body(Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_hello(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::handshake(&http1::Builder::new(), stream)
            .await
            .unwrap();

        let response = conn.send_request(get()).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        drop(response);

        conn.close();
        assert!(conn.is_closed());
        conn.close();

        let err = conn.send_request(get()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));

        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server connection should end once the client closes")
            .unwrap();
    }
}
