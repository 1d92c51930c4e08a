//! The shared request pipeline (§4.D): lookup, forward-on-miss, cache-if-
//! eligible. Used verbatim by the plain HTTP path and, after the CONNECT
//! handler terminates TLS and hands back a decrypted inner request, by the
//! MITM path as well.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;

use crate::access_log::{AccessLogRecord, CacheStatus};
use crate::cache::{self, CachedResponse};
use crate::error::{ProxyError, Result};
use crate::proxy::context::ProxyContext;
use crate::proxy::headers;

/// Everything the pipeline needs to address the origin and key the cache,
/// already resolved by the caller — the plain-HTTP path reads it off the
/// absolute-form request URI, the MITM path reconstructs it from the
/// `CONNECT` target plus the inner request's `Host` header.
pub struct RequestTarget {
    pub scheme: &'static str,
    pub host: String,
    pub path_and_query: String,
}

/// Which caller is running the pipeline, since §4.D and §4.E disagree on how
/// to surface an origin failure to the client.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Plain HTTP path: every origin-side failure becomes a `503`/`413`
    /// written back over the same connection.
    Plain,
    /// `CONNECT`/MITM path: a transport failure reaching the origin is
    /// synthesized as a `502 Bad Gateway` over the TLS stream, but a body
    /// read failure *after* a status line was already read closes the
    /// tunnel without writing anything (§4.E.6) — the client already got a
    /// status it can't un-read, so there's nothing honest left to send.
    Mitm,
}

/// Runs the full pipeline for one request and returns the response to write
/// back to the client. In `Plain` mode, never returns `Err` for anything
/// origin-related — those are caught and turned into `503`/`413` responses
/// so a single bad upstream can't tear down the connection. In `Mitm` mode,
/// an origin body-read failure after a successful status line returns `Err`
/// instead, so the caller's connection is dropped without a response
/// (§4.E.6) rather than writing a response of dubious honesty over TLS.
pub async fn handle(
    req: Request<Incoming>,
    target: RequestTarget,
    ctx: &ProxyContext,
    mode: PipelineMode,
) -> Result<Response<Full<Bytes>>> {
    let store = ctx.store.as_ref();
    let client = &ctx.client;
    let config_snapshot = ctx.current_config();
    let config: &crate::config::Config = config_snapshot.as_ref();
    let access_log = ctx.access_log.as_ref();
    let start = Instant::now();
    let method = req.method().clone();
    let mut parts_headers = req.headers().clone();
    let url = format!("{}://{}{}", target.scheme, target.host, target.path_and_query);

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let resp = error_response(&ProxyError::UpstreamBodyRead(e.to_string()));
            log(access_log, &method, &url, &resp, None, start);
            return Ok(resp);
        }
    };

    let post_cache_enabled = config.post_cache.enable;
    if method == http::Method::POST
        && post_cache_enabled
        && !cache::request_body_within_limit(body_bytes.len() as u64, config)
    {
        let resp = error_response(&ProxyError::RequestTooLarge {
            limit_bytes: config.max_request_body_size_bytes(),
        });
        log(access_log, &method, &url, &resp, None, start);
        return Ok(resp);
    }

    let (path, query) = split_path_and_query(&target.path_and_query);
    let keyable = cache::is_keyable(&method, post_cache_enabled);
    let fingerprint = if keyable {
        Some(if method == http::Method::POST {
            cache::fingerprint_post(
                target.scheme,
                &target.host,
                path,
                query,
                config.post_cache.include_query_string,
                &body_bytes,
            )
        } else {
            cache::fingerprint_get(target.scheme, &target.host, path, query)
        })
    } else {
        None
    };

    if let Some(fp) = &fingerprint {
        if let Some(cached) = store.lookup(fp) {
            let resp = write_cached(cached, true);
            log(access_log, &method, &url, &resp, Some(CacheStatus::Hit), start);
            return Ok(resp);
        }
    }

    headers::strip_hop_by_hop(&mut parts_headers);
    // The legacy client dials off the URI's authority, so this has to stay
    // absolute-form even though it was recovered from path+query on the MITM
    // path (§4.D) — a bare path would leave the connector with nowhere to dial.
    let absolute_url = format!("{}://{}{}", target.scheme, target.host, target.path_and_query);
    let mut upstream_req = Request::builder()
        .method(method.clone())
        .uri(absolute_url.parse::<Uri>().unwrap_or_else(|_| Uri::from_static("/")));
    for (name, value) in parts_headers.iter() {
        upstream_req = upstream_req.header(name, value);
    }
    if upstream_req.headers_ref().map(|h| h.get(http::header::HOST)).flatten().is_none() {
        if let Ok(value) = HeaderValue::from_str(&target.host) {
            upstream_req = upstream_req.header(http::header::HOST, value);
        }
    }
    let upstream_req = match upstream_req.body(Full::new(body_bytes.clone())) {
        Ok(r) => r,
        Err(e) => {
            let resp = error_response(&ProxyError::ClientProtocol(e.to_string()));
            log(access_log, &method, &url, &resp, fingerprint.as_ref().map(|_| CacheStatus::Miss), start);
            return Ok(resp);
        }
    };

    let upstream_resp = match client.send(upstream_req).await {
        Ok(resp) => resp,
        Err(e) => {
            let resp = match mode {
                PipelineMode::Plain => error_response(&e),
                PipelineMode::Mitm => bad_gateway_response(&e),
            };
            log(access_log, &method, &url, &resp, fingerprint.as_ref().map(|_| CacheStatus::Miss), start);
            return Ok(resp);
        }
    };

    let status = upstream_resp.status().as_u16();
    let resp_headers = headers::header_map_to_list(upstream_resp.headers());
    let resp_body = match upstream_resp.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let err = ProxyError::UpstreamBodyRead(e.to_string());
            if mode == PipelineMode::Mitm {
                log(access_log, &method, &url, &error_response(&err), fingerprint.as_ref().map(|_| CacheStatus::Miss), start);
                return Err(err);
            }
            let resp = error_response(&err);
            log(access_log, &method, &url, &resp, fingerprint.as_ref().map(|_| CacheStatus::Miss), start);
            return Ok(resp);
        }
    };

    if let Some(fp) = &fingerprint {
        let eligible = cache::is_cacheable(&resp_headers, config)
            && (method != http::Method::POST
                || cache::response_body_within_limit(resp_body.len() as u64, config));
        if eligible {
            let entry = CachedResponse::new(status, resp_headers.clone(), resp_body.clone());
            store.insert(fp.clone(), entry, cache::ttl_for(status, config));
        }
    }

    let mut builder = Response::builder().status(status);
    for (name, value) in &resp_headers {
        builder = builder.header(name, value);
    }
    if keyable {
        if let Some(headers) = builder.headers_mut() {
            headers::set_cache_status(headers, false);
        }
    }
    let resp = builder
        .body(Full::new(resp_body))
        .unwrap_or_else(|_| error_response(&ProxyError::ClientProtocol("malformed response".into())));

    log(access_log, &method, &url, &resp, fingerprint.as_ref().map(|_| CacheStatus::Miss), start);
    Ok(resp)
}

fn write_cached(entry: CachedResponse, hit: bool) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(entry.status);
    for (name, value) in &entry.headers {
        builder = builder.header(name, value);
    }
    if let Some(headers) = builder.headers_mut() {
        headers::set_cache_status(headers, hit);
    }
    builder
        .body(Full::new(entry.body))
        .unwrap_or_else(|_| error_response(&ProxyError::ClientProtocol("malformed cached response".into())))
}

fn error_response(err: &ProxyError) -> Response<Full<Bytes>> {
    let (status, body) = err.status_and_body();
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body)))
        .expect("static error response is always well-formed")
}

/// §4.E's override for a transport failure reaching the origin: `502`
/// instead of the plain path's `503`, since the client is talking to this
/// process over a tunnel it believes terminates at the real origin.
fn bad_gateway_response(err: &ProxyError) -> Response<Full<Bytes>> {
    let (_, body) = err.status_and_body();
    Response::builder()
        .status(502)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body)))
        .expect("static error response is always well-formed")
}

fn split_path_and_query(path_and_query: &str) -> (&str, &str) {
    match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    }
}

fn log(
    sink: &dyn AccessLogSink,
    method: &http::Method,
    url: &str,
    resp: &Response<Full<Bytes>>,
    cache_status: Option<CacheStatus>,
    start: Instant,
) {
    sink.log(&AccessLogRecord {
        method: method.to_string(),
        url: url.to_string(),
        status: resp.status().as_u16(),
        body_size: resp.body().size_hint().exact().unwrap_or(0),
        duration: elapsed(start),
        cache_status,
    });
}

fn elapsed(start: Instant) -> Duration {
    start.elapsed()
}
