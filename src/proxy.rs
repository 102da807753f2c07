//! Choosing a proxy for each request.
//!
//! The transport asks its [`ProxyResolver`] for a proxy URI on every round trip.
//! Resolvers are injected at construction, so there is no global proxy state.

use std::fmt;

use http::Uri;

use crate::address::is_secure;
use crate::BoxError;

/// Resolves the proxy (if any) to use for a request URI.
pub trait ProxyResolver: fmt::Debug + Send + Sync {
    /// Return the proxy URI for `uri`, or `None` to connect directly.
    fn resolve(&self, uri: &Uri) -> Result<Option<Uri>, BoxError>;
}

/// Always connect directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProxy;

impl ProxyResolver for NoProxy {
    fn resolve(&self, _uri: &Uri) -> Result<Option<Uri>, BoxError> {
        Ok(None)
    }
}

/// Send every request through the same proxy.
#[derive(Debug, Clone)]
pub struct FixedProxy {
    proxy: Uri,
}

impl FixedProxy {
    /// Use `proxy` for all requests.
    pub fn new(proxy: Uri) -> Self {
        Self { proxy }
    }
}

impl ProxyResolver for FixedProxy {
    fn resolve(&self, _uri: &Uri) -> Result<Option<Uri>, BoxError> {
        Ok(Some(self.proxy.clone()))
    }
}

/// Resolve proxies with a closure. See [`proxy_fn`].
#[derive(Clone)]
pub struct ProxyFn<F> {
    f: F,
}

impl<F> fmt::Debug for ProxyFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFn").finish()
    }
}

/// Build a resolver from a closure.
///
/// ```
/// # use concord::proxy::{proxy_fn, ProxyResolver};
/// let resolver = proxy_fn(|uri: &http::Uri| {
///     Ok((uri.host() != Some("localhost")).then(|| "http://proxy:3128".parse().unwrap()))
/// });
/// assert!(resolver.resolve(&"http://localhost/".parse().unwrap()).unwrap().is_none());
/// ```
pub fn proxy_fn<F>(f: F) -> ProxyFn<F>
where
    F: Fn(&Uri) -> Result<Option<Uri>, BoxError> + Send + Sync,
{
    ProxyFn { f }
}

impl<F> ProxyResolver for ProxyFn<F>
where
    F: Fn(&Uri) -> Result<Option<Uri>, BoxError> + Send + Sync,
{
    fn resolve(&self, uri: &Uri) -> Result<Option<Uri>, BoxError> {
        (self.f)(uri)
    }
}

/// Resolve proxies from the conventional environment variables.
///
/// `HTTP_PROXY` applies to `http` requests and `HTTPS_PROXY` to `https` requests
/// (lowercase names are consulted first). Proxy values without a scheme are
/// treated as `http://`. `NO_PROXY` is a comma separated list of hosts which are
/// reached directly: `*` matches everything, `example.com` and `.example.com`
/// match the domain and its subdomains, and `host:port` entries only match that
/// port. IPv6 entries may be bare (`::1`) or bracketed (`[::1]:8080`).
#[derive(Debug, Clone, Default)]
pub struct EnvProxy {
    http: Option<String>,
    https: Option<String>,
    no_proxy: Vec<String>,
}

impl EnvProxy {
    /// Read the proxy configuration from the process environment.
    pub fn from_env() -> Self {
        Self::new(
            env_var(&["http_proxy", "HTTP_PROXY"]),
            env_var(&["https_proxy", "HTTPS_PROXY"]),
            env_var(&["no_proxy", "NO_PROXY"]).as_deref(),
        )
    }

    /// Build the configuration from explicit values.
    pub fn new(http: Option<String>, https: Option<String>, no_proxy: Option<&str>) -> Self {
        let no_proxy = no_proxy
            .map(|list| {
                list.split(',')
                    .map(|entry| entry.trim().to_ascii_lowercase())
                    .filter(|entry| !entry.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            http: http.filter(|value| !value.is_empty()),
            https: https.filter(|value| !value.is_empty()),
            no_proxy,
        }
    }

    fn bypass(&self, uri: &Uri) -> bool {
        let Some(host) = uri.host() else {
            return false;
        };
        let host = unbracket(host).to_ascii_lowercase();
        let port = uri.port_u16();

        self.no_proxy.iter().any(|entry| {
            if entry == "*" {
                return true;
            }

            let (pattern, entry_port) = split_port(entry);
            if let Some(entry_port) = entry_port {
                if Some(entry_port) != port {
                    return false;
                }
            }

            let pattern = unbracket(pattern)
                .trim_start_matches("*.")
                .trim_start_matches('.');
            host == pattern || host.ends_with(&format!(".{pattern}"))
        })
    }
}

impl ProxyResolver for EnvProxy {
    fn resolve(&self, uri: &Uri) -> Result<Option<Uri>, BoxError> {
        if self.bypass(uri) {
            return Ok(None);
        }

        let proxy = if is_secure(uri) {
            self.https.as_deref()
        } else {
            self.http.as_deref()
        };

        match proxy {
            Some(proxy) if proxy.contains("://") => Ok(Some(proxy.parse()?)),
            Some(proxy) => Ok(Some(format!("http://{proxy}").parse()?)),
            None => Ok(None),
        }
    }
}

fn env_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| std::env::var(name).ok())
}

fn unbracket(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Split `host:port` into its parts.
///
/// IPv6 literals need brackets to carry a port; a bare literal is a host only.
fn split_port(entry: &str) -> (&str, Option<u16>) {
    if !entry.starts_with('[') && entry.matches(':').count() > 1 {
        return (entry, None);
    }

    match entry.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !port.contains(']') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (entry, None),
        },
        _ => (entry, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(value: &str) -> Uri {
        value.parse().unwrap()
    }

    #[test]
    fn fixed_proxy() {
        let resolver = FixedProxy::new(uri("http://proxy:3128"));
        assert_eq!(
            resolver.resolve(&uri("https://example.com")).unwrap(),
            Some(uri("http://proxy:3128"))
        );
        assert_eq!(NoProxy.resolve(&uri("https://example.com")).unwrap(), None);
    }

    #[test]
    fn env_proxy_by_scheme() {
        let resolver = EnvProxy::new(
            Some("http://plain:3128".into()),
            Some("secure:8443".into()),
            None,
        );
        assert_eq!(
            resolver.resolve(&uri("http://example.com")).unwrap(),
            Some(uri("http://plain:3128"))
        );
        assert_eq!(
            resolver.resolve(&uri("https://example.com")).unwrap(),
            Some(uri("http://secure:8443"))
        );
    }

    #[test]
    fn env_proxy_no_proxy() {
        let resolver = EnvProxy::new(
            Some("http://proxy:3128".into()),
            None,
            Some("localhost, .internal.example,example.org:8080"),
        );
        assert_eq!(resolver.resolve(&uri("http://localhost/")).unwrap(), None);
        assert_eq!(resolver.resolve(&uri("http://LOCALHOST/")).unwrap(), None);
        assert_eq!(
            resolver.resolve(&uri("http://api.internal.example/")).unwrap(),
            None
        );
        assert_eq!(resolver.resolve(&uri("http://internal.example/")).unwrap(), None);
        assert_eq!(
            resolver.resolve(&uri("http://example.org:8080/")).unwrap(),
            None
        );
        assert!(resolver
            .resolve(&uri("http://example.org/"))
            .unwrap()
            .is_some());
        assert!(resolver
            .resolve(&uri("http://notlocalhost/"))
            .unwrap()
            .is_some());

        // no https proxy configured
        assert_eq!(resolver.resolve(&uri("https://example.org/")).unwrap(), None);
    }

    #[test]
    fn env_proxy_no_proxy_ipv6() {
        let resolver = EnvProxy::new(
            Some("http://proxy:3128".into()),
            None,
            Some("::1,[fd00::2]:8080"),
        );
        assert_eq!(resolver.resolve(&uri("http://[::1]/")).unwrap(), None);
        assert_eq!(resolver.resolve(&uri("http://[::1]:9000/")).unwrap(), None);
        assert_eq!(resolver.resolve(&uri("http://[fd00::2]:8080/")).unwrap(), None);
        assert!(resolver
            .resolve(&uri("http://[fd00::2]/"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn env_proxy_wildcard() {
        let resolver = EnvProxy::new(Some("http://proxy:3128".into()), None, Some("*"));
        assert_eq!(resolver.resolve(&uri("http://example.com/")).unwrap(), None);
    }

    #[test]
    fn env_proxy_invalid_value() {
        let resolver = EnvProxy::new(Some("http://bad proxy".into()), None, None);
        assert!(resolver.resolve(&uri("http://example.com/")).is_err());
    }

    #[test]
    fn closure_resolver() {
        let resolver = proxy_fn(|uri: &Uri| {
            if uri.host() == Some("direct") {
                Ok(None)
            } else {
                Ok(Some("http://proxy:3128".parse()?))
            }
        });
        assert_eq!(resolver.resolve(&uri("http://direct/")).unwrap(), None);
        assert!(resolver.resolve(&uri("http://other/")).unwrap().is_some());
    }

    #[test]
    fn split_host_port() {
        assert_eq!(split_port("example.org:8080"), ("example.org", Some(8080)));
        assert_eq!(split_port("example.org"), ("example.org", None));
        assert_eq!(split_port("[::1]:80"), ("[::1]", Some(80)));
        assert_eq!(split_port("[::1]"), ("[::1]", None));
        assert_eq!(split_port("::1"), ("::1", None));
        assert_eq!(split_port("fe80::1:8080"), ("fe80::1:8080", None));
    }
}
