//! The `CONNECT` / MITM handler (§4.E): hijacks the client connection,
//! terminates TLS with a freshly minted leaf certificate, and runs the
//! decrypted inner request through the same pipeline as the plain HTTP path.

use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::TlsAcceptor;

use crate::certs::LeafCertEntry;
use crate::error::{ProxyError, Result};
use crate::proxy::context::ProxyContext;
use crate::proxy::http_handler::{self, PipelineMode, RequestTarget};

pub fn is_connect(req: &Request<Incoming>) -> bool {
    req.method() == http::Method::CONNECT
}

/// Returns the `200 Connection Established` response to hand back to the
/// client immediately, and spawns the task that drives the hijacked
/// connection once the upgrade completes. If the authority can't be parsed,
/// returns `400` and never upgrades.
pub fn handle(req: Request<Incoming>, ctx: ProxyContext) -> Response<Full<Bytes>> {
    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return Response::builder()
            .status(400)
            .body(Full::new(Bytes::from("malformed CONNECT target")))
            .expect("static response is well-formed");
    };
    let host = strip_port(&authority).to_string();

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = serve_tunnel(upgraded, host.clone(), authority.clone(), ctx).await {
                    tracing::warn!(host = %host, error = %e, "MITM tunnel closed with error");
                }
            }
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "CONNECT upgrade failed");
            }
        }
    });

    Response::builder()
        .status(200)
        .body(Full::new(Bytes::new()))
        .expect("static response is well-formed")
}

fn strip_port(authority: &str) -> &str {
    authority.rsplit_once(':').map(|(host, _)| host).unwrap_or(authority)
}

async fn serve_tunnel(upgraded: Upgraded, host: String, authority: String, ctx: ProxyContext) -> Result<()> {
    let leaf = ctx.cert_store.get(&host)?;
    let tls_config = server_config_for_leaf(&leaf)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let client_io = TokioIo::new(upgraded);
    let tls_stream = acceptor
        .accept(client_io)
        .await
        .map_err(|e| ProxyError::ClientProtocol(format!("TLS handshake failed: {e}")))?;
    let tls_io = TokioIo::new(tls_stream);

    // One request per tunnel (§4.E.5): no keep-alive, so the connection
    // closes cleanly once the single response has been written.
    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        let authority = authority.clone();
        async move { run_pipeline(req, authority, ctx).await }
    });

    hyper::server::conn::http1::Builder::new()
        .keep_alive(false)
        .serve_connection(tls_io, service)
        .await
        .map_err(|e| ProxyError::ClientProtocol(format!("inner connection error: {e}")))?;

    Ok(())
}

async fn run_pipeline(
    req: Request<Incoming>,
    authority: String,
    ctx: ProxyContext,
) -> Result<Response<Full<Bytes>>> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    // Some clients send an absolute-form inner request; rebuild as
    // origin-form against the CONNECT host either way (§4.E.6).
    let rebuilt_uri: Uri = path_and_query.parse().unwrap_or_else(|_| Uri::from_static("/"));
    let (mut parts, body) = req.into_parts();
    parts.uri = rebuilt_uri;
    let req = Request::from_parts(parts, body);

    // `authority` is the CONNECT target verbatim (host:port), so the
    // re-forward dials the same origin the client asked to tunnel to.
    let target = RequestTarget {
        scheme: "https",
        host: authority,
        path_and_query,
    };

    http_handler::handle(req, target, &ctx, PipelineMode::Mitm).await
}

fn server_config_for_leaf(leaf: &LeafCertEntry) -> Result<ServerConfig> {
    let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut leaf.certificate_pem.as_bytes())
        .filter_map(|r| r.ok())
        .collect();

    let mut keys: Vec<PrivatePkcs8KeyDer<'static>> =
        rustls_pemfile::pkcs8_private_keys(&mut leaf.private_key_pem.as_bytes())
            .filter_map(|r| r.ok())
            .collect();
    let key = keys
        .pop()
        .ok_or_else(|| ProxyError::CertGeneration("no private key in leaf PEM".into()))?;

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, PrivateKeyDer::Pkcs8(key))
        .map_err(|e| ProxyError::CertGeneration(format!("failed to build TLS server config: {e}")))
}
