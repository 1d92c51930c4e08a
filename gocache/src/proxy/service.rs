//! Top-level `hyper` service: dispatches `CONNECT` to the MITM handler and
//! everything else to the plain pipeline against the request's absolute-URI
//! target.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::Service;

use crate::proxy::connect_handler;
use crate::proxy::context::ProxyContext;
use crate::proxy::http_handler::{self, PipelineMode, RequestTarget};

#[derive(Clone)]
pub struct ProxyService {
    ctx: ProxyContext,
}

impl ProxyService {
    pub fn new(ctx: ProxyContext) -> Self {
        Self { ctx }
    }
}

impl Service<Request<Incoming>> for ProxyService {
    type Response = Response<Full<Bytes>>;
    type Error = crate::error::ProxyError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let ctx = self.ctx.clone();

        if connect_handler::is_connect(&req) {
            return Box::pin(async move { Ok(connect_handler::handle(req, ctx)) });
        }

        Box::pin(async move {
            let target = match absolute_target(&req) {
                Some(target) => target,
                None => {
                    return Ok(Response::builder()
                        .status(400)
                        .body(Full::new(Bytes::from("request-target must be absolute-URI")))
                        .expect("static response is well-formed"));
                }
            };
            http_handler::handle(req, target, &ctx, PipelineMode::Plain).await
        })
    }
}

/// A plain (non-`CONNECT`) proxy request carries an absolute-URI
/// request-target (`GET http://host/path HTTP/1.1`); this recovers scheme,
/// host, and path+query from it.
fn absolute_target(req: &Request<Incoming>) -> Option<RequestTarget> {
    let uri: &Uri = req.uri();
    let scheme = match uri.scheme_str() {
        Some("http") => "http",
        Some("https") => "https",
        _ => return None,
    };
    let host = uri.authority()?.to_string();
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    Some(RequestTarget {
        scheme,
        host,
        path_and_query,
    })
}
