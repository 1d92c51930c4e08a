//! Header plumbing shared by the plain and MITM handlers: hop-by-hop
//! stripping, the `X-Cache` marker, and conversions between `http::HeaderMap`
//! and the cache's order-and-duplicate-preserving [`HeaderList`].

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::cache::HeaderList;

pub const X_CACHE: &str = "x-cache";

/// Headers stripped from the outgoing request before it's forwarded
/// upstream — proxy-to-proxy hop-by-hop headers the origin never needs to
/// see.
const HOP_BY_HOP_REQUEST_HEADERS: &[&str] = &["proxy-connection", "proxy-authorization"];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_REQUEST_HEADERS {
        headers.remove(*name);
    }
}

/// Converts an `http::HeaderMap` into the ordered multimap the store keeps,
/// preserving duplicates (e.g. repeated `Set-Cookie`).
pub fn header_map_to_list(headers: &HeaderMap) -> HeaderList {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// The inverse of [`header_map_to_list`]; entries that fail to parse back
/// into valid header name/value pairs are skipped rather than aborting the
/// whole response.
pub fn header_list_to_map(list: &HeaderList) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in list {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        map.append(name, value);
    }
    map
}

pub fn set_cache_status(headers: &mut HeaderMap, hit: bool) {
    let value = if hit { "HIT" } else { "MISS" };
    headers.insert(
        HeaderName::from_static(X_CACHE),
        HeaderValue::from_static(value),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_proxy_hop_by_hop_headers_only() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic xyz"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("proxy-connection").is_none());
        assert!(headers.get("proxy-authorization").is_none());
        assert!(headers.get("accept").is_some());
    }

    #[test]
    fn header_list_round_trip_preserves_duplicates_and_order() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let list = header_map_to_list(&headers);
        assert_eq!(
            list,
            vec![
                ("set-cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
            ]
        );

        let back = header_list_to_map(&list);
        let values: Vec<_> = back.get_all("set-cookie").iter().collect();
        assert_eq!(values.len(), 2);
    }
}
