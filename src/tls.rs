//! TLS over direct connections and proxy tunnels, using `tokio-rustls`.

use std::io;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{trace, warn};

/// Get a default TLS client configuration by loading the platform's native certificates.
///
/// Certificates which fail to load or parse are skipped with a warning.
pub fn default_tls_config() -> ClientConfig {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(%error, "failed to load platform certificates");
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    trace!(added, ignored, "loaded platform certificates");

    let mut cfg = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    cfg.alpn_protocols.push(b"http/1.1".to_vec());
    cfg
}

/// Run the client side of a TLS handshake for `host` over `stream`.
///
/// `host` may be a DNS name or an IP literal; IPv6 brackets are ignored.
#[tracing::instrument(name = "tls", skip(config, stream), level = "debug")]
pub async fn connect<IO>(
    config: Arc<ClientConfig>,
    host: &str,
    stream: IO,
) -> Result<TlsStream<IO>, io::Error>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let domain = host.trim_start_matches('[').trim_end_matches(']');
    let name = ServerName::try_from(domain.to_owned())
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

    let stream = TlsConnector::from(config).connect(name, stream).await?;
    trace!("tls handshake complete");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_server_name() {
        let config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth(),
        );
        let (client, _server) = tokio::io::duplex(1024);

        let err = connect(config, "not a hostname", client).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
