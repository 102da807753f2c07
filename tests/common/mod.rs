#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// `Basic` credentials for `testuser:testpassword`.
pub const CREDENTIALS: &str = "Basic dGVzdHVzZXI6dGVzdHBhc3N3b3Jk";

pub const REALM: &str = r#"Basic realm="Access to some server""#;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Serve HTTP/1.1 connections from `listener` with `handler`, forever.
pub fn serve<F, Fut>(listener: TcpListener, handler: F)
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            tokio::spawn(serve_connection(stream, handler));
        }
    });
}

async fn serve_connection<IO, F, Fut>(stream: IO, handler: F)
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let service = hyper::service::service_fn(move |req| {
        let response = handler(req);
        async move { Ok::<_, Infallible>(response.await) }
    });
    let conn = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    if let Err(error) = tokio::time::timeout(TIMEOUT, conn).await {
        tracing::debug!(%error, "test connection timed out");
    }
}

pub fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

pub fn challenge() -> Response<Full<Bytes>> {
    let mut response = response(StatusCode::PROXY_AUTHENTICATION_REQUIRED, "authenticate");
    response
        .headers_mut()
        .insert(PROXY_AUTHENTICATE, HeaderValue::from_static(REALM));
    response
}

pub fn authorized<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(PROXY_AUTHORIZATION)
        .is_some_and(|value| value.as_bytes() == CREDENTIALS.as_bytes())
}

pub async fn body_bytes(req: Request<Incoming>) -> Result<Bytes, BoxError> {
    Ok(req.into_body().collect().await?.to_bytes())
}

/// An origin server which answers every request with `hello`.
pub async fn hello_server() -> SocketAddr {
    let (listener, addr) = listener().await;
    serve(listener, |_req| async {
        response(StatusCode::OK, "hello")
    });
    addr
}

/// A `CONNECT` proxy which splices tunnels to their target.
///
/// With `require_auth`, tunnels are only opened when the request carries
/// [`CREDENTIALS`]. Requests other than `CONNECT` are answered with `405`.
pub async fn connect_proxy(require_auth: bool) -> SocketAddr {
    let (listener, addr) = listener().await;
    serve(listener, move |mut req| async move {
        if req.method() != http::Method::CONNECT {
            return response(StatusCode::METHOD_NOT_ALLOWED, "");
        }

        if require_auth && !authorized(&req) {
            return challenge();
        }

        let Some(target) = req.uri().authority().map(|a| a.to_string()) else {
            return response(StatusCode::BAD_REQUEST, "");
        };

        tokio::spawn(async move {
            let upgraded = match hyper::upgrade::on(&mut req).await {
                Ok(upgraded) => upgraded,
                Err(error) => {
                    tracing::warn!(%error, "proxy upgrade failed");
                    return;
                }
            };
            let Ok(mut upstream) = TcpStream::connect(target).await else {
                return;
            };
            let mut downstream = TokioIo::new(upgraded);
            let _ = tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await;
        });

        response(StatusCode::OK, "")
    });
    addr
}

#[cfg(feature = "tls")]
pub mod tls {
    use std::sync::Arc;

    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

    use super::*;

    pub struct Certificate {
        pub cert: CertificateDer<'static>,
        pub key: PrivateKeyDer<'static>,
    }

    pub fn certificate() -> Certificate {
        let params = rcgen::CertificateParams::new(vec!["localhost".to_owned()]).unwrap();
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        Certificate {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
        }
    }

    /// A client configuration which trusts only `cert`.
    pub fn client_config(cert: &Certificate) -> Arc<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert.cert.clone()).unwrap();
        Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }

    /// A TLS origin for `localhost` which answers every request with its path.
    pub async fn tls_server(cert: &Certificate) -> SocketAddr {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.cert.clone()], cert.key.clone_key())
            .unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(stream) = acceptor.accept(stream).await else {
                        return;
                    };
                    serve_connection(stream, |req: Request<Incoming>| async move {
                        response(StatusCode::OK, req.uri().path().to_owned())
                    })
                    .await;
                });
            }
        });
        addr
    }
}
