//! Cache policy (component C): pure functions of request/response that
//! decide keyability, fingerprinting, and cacheability. None of this module
//! touches the store or the network.

use std::time::Duration;

use http::Method;
use sha2::{Digest, Sha256};

use crate::cache::entry::HeaderList;
use crate::config::Config;

/// True iff the method is `GET`, or the method is `POST` and POST-caching
/// is enabled.
pub fn is_keyable(method: &Method, post_cache_enabled: bool) -> bool {
    *method == Method::GET || (*method == Method::POST && post_cache_enabled)
}

/// Canonicalizes a raw query string: parses into ordered pairs, sorts by key
/// (a stable sort, so multi-values within a key keep their original relative
/// order), and re-encodes.
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    serializer.extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    serializer.finish()
}

/// Fingerprint for a `GET` request. Fragment is never part of the input (the
/// caller never carries one past the client's request line), the port is
/// retained as part of `host` when present.
pub fn fingerprint_get(scheme: &str, host: &str, path: &str, query: &str) -> String {
    format!("{scheme}://{host}{path}?{}", canonical_query(query))
}

/// Fingerprint for a `POST` request (only meaningful when POST-caching is
/// enabled and the request is keyable).
pub fn fingerprint_post(
    scheme: &str,
    host: &str,
    path: &str,
    query: &str,
    include_query_string: bool,
    body: &[u8],
) -> String {
    let mut key = format!("{scheme}://{host}{path}");
    if include_query_string && !query.is_empty() {
        key.push('?');
        key.push_str(query);
    }
    key.push(':');
    key.push_str(&hex::encode(Sha256::digest(body)));
    key
}

/// `[400, 599] => negative_ttl`, otherwise `default_ttl`.
pub fn ttl_for(status: u16, config: &Config) -> Duration {
    if (400..=599).contains(&status) {
        config.negative_ttl
    } else {
        config.default_ttl
    }
}

/// 1. `Content-Type` (stripped of parameters) must prefix-match one of
///    `cacheable_types`.
/// 2. Unless `ignore_no_cache`, reject `Cache-Control: no-cache`/`no-store`
///    or `Pragma: no-cache`.
pub fn is_cacheable(headers: &HeaderList, config: &Config) -> bool {
    let Some(content_type) = header_value(headers, "content-type") else {
        return false;
    };
    let base_type = content_type.split(';').next().unwrap_or("").trim();
    if !config.cacheable_types.iter().any(|prefix| base_type.starts_with(prefix.as_str())) {
        return false;
    }

    if !config.ignore_no_cache {
        if let Some(cache_control) = header_value(headers, "cache-control") {
            let lower = cache_control.to_ascii_lowercase();
            if lower.contains("no-cache") || lower.contains("no-store") {
                return false;
            }
        }
        if let Some(pragma) = header_value(headers, "pragma") {
            if pragma.eq_ignore_ascii_case("no-cache") {
                return false;
            }
        }
    }

    true
}

pub fn request_body_within_limit(body_len: u64, config: &Config) -> bool {
    body_len <= config.max_request_body_size_bytes()
}

pub fn response_body_within_limit(body_len: u64, config: &Config) -> bool {
    body_len <= config.max_response_body_size_bytes()
}

fn header_value<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
