//! Response bodies which own the connection they are read from.
//!
//! The transport hands its [`Connection`] to the [`ConnectionBody`] of the response
//! it returns. Closing the body (explicitly with [`ConnectionBody::close`], or by
//! dropping it) closes the connection. Reading the body to the end does not.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::Response;
use http_body::{Body as HttpBody, Frame, SizeHint};
use hyper::body::Incoming;

use crate::conn::{Connection, ConnectionError};

/// A response body bound to the connection that produced it.
///
/// Bytes are passed through as they arrive; nothing is buffered.
#[derive(Debug)]
#[pin_project::pin_project]
pub struct ConnectionBody {
    #[pin]
    body: Incoming,
    connection: Connection,
}

/// Bind `response`'s body to `connection`, transferring ownership of the connection.
pub fn wrap(connection: Connection, response: Response<Incoming>) -> Response<ConnectionBody> {
    response.map(|body| ConnectionBody { body, connection })
}

impl ConnectionBody {
    /// Close the underlying connection.
    ///
    /// Only the first call has an effect.
    pub fn close(&mut self) {
        self.connection.close();
    }

    /// Whether the underlying connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}

impl HttpBody for ConnectionBody {
    type Data = Bytes;
    type Error = ConnectionError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if this.connection.is_closed() {
            return Poll::Ready(Some(Err(ConnectionError::Closed)));
        }
        this.body.poll_frame(cx).map_err(ConnectionError::Io)
    }

    fn is_end_stream(&self) -> bool {
        self.body.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.body.size_hint()
    }
}
