//! End-to-end tests for the plain HTTP proxy path: a real loopback origin,
//! a real `ProxyService` bound to its own loopback listener, and a raw TCP
//! client speaking absolute-form HTTP/1.1 requests the way a browser
//! configured to use this proxy would.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use gocache::access_log::TracingAccessLog;
use gocache::cache::ResponseStore;
use gocache::certs::{CertStore, CertificateAuthority};
use gocache::config::{Config, PostCacheConfig};
use gocache::proxy::{ProxyClient, ProxyContext, ProxyService};

struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl RawResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn parse_response(buf: &[u8]) -> RawResponse {
    let text = String::from_utf8_lossy(buf);
    let (head, body) = text.split_once("\r\n\r\n").unwrap_or((&text, ""));
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    RawResponse {
        status,
        headers,
        body: body.to_string(),
    }
}

/// Opens a fresh connection, sends `raw_request` (which must carry
/// `Connection: close`), and reads until the server closes the socket.
async fn send_request(addr: SocketAddr, raw_request: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect to proxy");
    stream
        .write_all(raw_request.as_bytes())
        .await
        .expect("write request");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.expect("read response");
    parse_response(&buf)
}

/// Starts a loopback origin server driven by `handler`, and a counter of how
/// many requests it has served.
async fn spawn_origin<F, Fut>(handler: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send,
{
    let hits = Arc::new(AtomicUsize::new(0));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let hits_loop = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            let hits = hits_loop.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Infallible>(handler(req).await)
                    }
                });
                let _ = http1::Builder::new().serve_connection(io, service).await;
            });
        }
    });

    (addr, hits)
}

/// Starts a `ProxyService` bound to its own loopback listener, with a fresh
/// CA directory and response store. The returned `TempDir` must stay alive
/// for the listener's lifetime.
async fn spawn_proxy(config: Config) -> (SocketAddr, Arc<ResponseStore>, tempfile::TempDir) {
    let ca_dir = tempfile::tempdir().unwrap();
    let ca = CertificateAuthority::load_or_generate(ca_dir.path()).unwrap();
    let cert_store = Arc::new(CertStore::new(ca, 0));
    let store = Arc::new(ResponseStore::new(
        config.max_size_bytes(),
        config.default_ttl,
        config.negative_ttl,
    ));

    let ctx = ProxyContext {
        store: store.clone(),
        cert_store,
        client: ProxyClient::new(),
        config: Arc::new(RwLock::new(Arc::new(config))),
        access_log: Arc::new(TracingAccessLog),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = ProxyService::new(ctx);
                let _ = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await;
            });
        }
    });

    (addr, store, ca_dir)
}

fn get_request(origin: SocketAddr, target: &str) -> String {
    format!(
        "GET http://{origin}{target} HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n"
    )
}

#[tokio::test]
async fn test_http_get_cacheable_hit_after_miss() {
    let (origin_addr, hits) = spawn_origin(|_req| async {
        Response::builder()
            .status(200)
            .header("content-type", "text/plain")
            .body(Full::new(Bytes::from("hello from origin")))
            .unwrap()
    })
    .await;

    let (proxy_addr, _store, _ca_dir) = spawn_proxy(Config::default()).await;
    let req = get_request(origin_addr, "/cacheable");

    let first = send_request(proxy_addr, &req).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("x-cache"), Some("MISS"));
    assert_eq!(first.body, "hello from origin");

    let second = send_request(proxy_addr, &req).await;
    assert_eq!(second.status, 200);
    assert_eq!(second.header("x-cache"), Some("HIT"));
    assert_eq!(second.body, "hello from origin");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_reorder_produces_cache_hit() {
    let (origin_addr, hits) = spawn_origin(|req| async move {
        let query = req.uri().query().unwrap_or("").to_string();
        Response::builder()
            .status(200)
            .header("content-type", "text/plain")
            .body(Full::new(Bytes::from(query)))
            .unwrap()
    })
    .await;

    let (proxy_addr, _store, _ca_dir) = spawn_proxy(Config::default()).await;

    let first = send_request(proxy_addr, &get_request(origin_addr, "/search?b=2&a=1")).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("x-cache"), Some("MISS"));
    assert_eq!(first.body, "b=2&a=1");

    let second = send_request(proxy_addr, &get_request(origin_addr, "/search?a=1&b=2")).await;
    assert_eq!(second.status, 200);
    assert_eq!(second.header("x-cache"), Some("HIT"));
    // Served from cache, so this is the first request's origin body verbatim.
    assert_eq!(second.body, "b=2&a=1");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_negative_caching_expires_independently_of_default_ttl() {
    let (origin_addr, hits) = spawn_origin(|_req| async {
        Response::builder()
            .status(404)
            .header("content-type", "text/plain")
            .body(Full::new(Bytes::from("not found")))
            .unwrap()
    })
    .await;

    let config = Config {
        negative_ttl: Duration::from_millis(150),
        default_ttl: Duration::from_secs(60),
        ..Config::default()
    };
    let (proxy_addr, _store, _ca_dir) = spawn_proxy(config).await;
    let req = get_request(origin_addr, "/missing");

    let first = send_request(proxy_addr, &req).await;
    assert_eq!(first.status, 404);
    assert_eq!(first.header("x-cache"), Some("MISS"));

    let second = send_request(proxy_addr, &req).await;
    assert_eq!(second.status, 404);
    assert_eq!(second.header("x-cache"), Some("HIT"));

    tokio::time::sleep(Duration::from_millis(250)).await;

    let third = send_request(proxy_addr, &req).await;
    assert_eq!(third.status, 404);
    assert_eq!(third.header("x-cache"), Some("MISS"));

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_post_body_keyed_caching() {
    let (origin_addr, hits) = spawn_origin(|req| async move {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        Response::builder()
            .status(200)
            .header("content-type", "text/plain")
            .body(Full::new(body))
            .unwrap()
    })
    .await;

    let config = Config {
        post_cache: PostCacheConfig {
            enable: true,
            ..PostCacheConfig::default()
        },
        ..Config::default()
    };
    let (proxy_addr, _store, _ca_dir) = spawn_proxy(config).await;

    let post_request = |body: &str| {
        format!(
            "POST http://{origin_addr}/submit HTTP/1.1\r\nHost: {origin_addr}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    };

    let first = send_request(proxy_addr, &post_request("alpha")).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("x-cache"), Some("MISS"));
    assert_eq!(first.body, "alpha");

    let second = send_request(proxy_addr, &post_request("alpha")).await;
    assert_eq!(second.header("x-cache"), Some("HIT"));
    assert_eq!(second.body, "alpha");

    let third = send_request(proxy_addr, &post_request("beta")).await;
    assert_eq!(third.header("x-cache"), Some("MISS"));
    assert_eq!(third.body, "beta");

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_oversized_response_is_never_cached() {
    let big_body = "a".repeat(2 * 1024 * 1024);
    let (origin_addr, hits) = spawn_origin(move |_req| {
        let big_body = big_body.clone();
        async move {
            Response::builder()
                .status(200)
                .header("content-type", "text/plain")
                .body(Full::new(Bytes::from(big_body)))
                .unwrap()
        }
    })
    .await;

    let config = Config {
        max_size_mb: 1,
        ..Config::default()
    };
    let (proxy_addr, store, _ca_dir) = spawn_proxy(config).await;
    let req = get_request(origin_addr, "/big");

    let first = send_request(proxy_addr, &req).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.header("x-cache"), Some("MISS"));

    let second = send_request(proxy_addr, &req).await;
    assert_eq!(second.status, 200);
    assert_eq!(second.header("x-cache"), Some("MISS"));

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(store.stats().entry_count, 0);
}

#[tokio::test]
async fn test_non_absolute_request_target_is_rejected() {
    let (proxy_addr, _store, _ca_dir) = spawn_proxy(Config::default()).await;

    let response = send_request(
        proxy_addr,
        "GET /relative HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(response.status, 400);
}
