//! The configured HTTP client used to forward cache misses to origin
//! servers.
//!
//! Uses `hyper_util`'s legacy client over a `hyper_rustls` connector that
//! dials plain HTTP for `http://` targets and a fresh outbound TLS
//! connection for `https://` targets — the latter is what makes the
//! `CONNECT`/MITM path actually work against a real origin: the inner
//! request the CONNECT handler decrypts still has to be re-forwarded to a
//! TLS-only port 443, not replayed as plaintext. A bare `HttpConnector`
//! (the `client-legacy` feature this crate's lineage, `rapina`, already
//! carries in its `hyper-util` dependency) is enough for the plain-HTTP
//! path alone, but not for MITM'd traffic.

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::RootCertStore;

use crate::error::{ProxyError, Result};

#[derive(Clone)]
pub struct ProxyClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl ProxyClient {
    pub fn new() -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let inner = Client::builder(TokioExecutor::new()).build(connector);
        Self { inner }
    }

    /// Like [`ProxyClient::new`], but trusts `extra_root_pem` (a
    /// PEM-encoded certificate) in addition to the public webpki roots.
    /// Production forwarding never needs this; it exists so an integration
    /// test can stand up a mock origin signed by an ad-hoc test CA without
    /// weakening what `ProxyClient::new` trusts.
    pub fn with_extra_root(extra_root_pem: &str) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut reader = extra_root_pem.as_bytes();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert
                .map_err(|e| ProxyError::UpstreamTransport(format!("parse extra root: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| ProxyError::UpstreamTransport(format!("add extra root: {e}")))?;
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();
        let inner = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self { inner })
    }

    /// Forwards `req` to the origin. Any transport-level failure (DNS, TCP,
    /// TLS-to-origin) is surfaced as [`ProxyError::UpstreamTransport`]; the
    /// caller writes a `503` and never caches the failure.
    pub async fn send(&self, req: Request<Full<Bytes>>) -> Result<Response<Incoming>> {
        self.inner
            .request(req)
            .await
            .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))
    }
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new()
    }
}
