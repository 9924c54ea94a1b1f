//! Read access to the document cache
//!
//! Route pattern:
//! - GET /api/cache/{collection}?{query} - filtered, sorted, paginated list
//! - GET /api/cache/{collection}/{id}    - point lookup
//!
//! Query parameters:
//! - `field=value` - equality (dotted paths allowed)
//! - `field=a,b`   - membership
//! - `sort=field` or `sort=-field`
//! - `limit`, `skip`
//!
//! Values are matched as strings, and also as numbers or booleans when they
//! parse as one, so `version=2` finds documents with a numeric version.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{error_response, json_response};
use crate::db::schemas::ALL_COLLECTIONS;
use crate::db::{Filter, FindOptions, Sort};
use crate::server::AppState;
use crate::types::{Result, WatchError};

/// Page size when no limit is given
pub const DEFAULT_LIMIT: usize = 100;

/// Largest accepted page size
pub const MAX_LIMIT: usize = 1000;

/// List response
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<JsonValue>,
    pub total: usize,
}

/// Parsed cache route
#[derive(Debug, PartialEq, Eq)]
struct CacheRoute {
    collection: String,
    id: Option<String>,
}

impl CacheRoute {
    /// Parse "/api/cache/{collection}" or "/api/cache/{collection}/{id}"
    fn parse(path: &str) -> Option<Self> {
        let stripped = path.strip_prefix("/api/cache/")?.trim_end_matches('/');
        let mut parts = stripped.splitn(2, '/');

        let collection = parts.next().filter(|c| !c.is_empty())?;
        let id = match parts.next() {
            Some("") => return None,
            Some(id) => Some(decode_component(id)),
            None => None,
        };

        Some(Self {
            collection: decode_component(collection),
            id,
        })
    }
}

/// Handle GET /api/cache/*
pub fn handle_cache_request(state: &AppState, path: &str, query: Option<&str>) -> Response<Full<Bytes>> {
    let Some(route) = CacheRoute::parse(path) else {
        return error_response(WatchError::BadRequest(
            "expected /api/cache/{collection}[/{id}]".into(),
        ));
    };

    let known = ALL_COLLECTIONS.contains(&route.collection.as_str())
        || state.cache.collection_names().contains(&route.collection);
    if !known {
        return error_response(WatchError::NotFound(format!(
            "collection '{}'",
            route.collection
        )));
    }

    match route.id {
        Some(id) => match state.cache.get(&route.collection, &id) {
            Ok(Some(doc)) => json_response(StatusCode::OK, &doc),
            Ok(None) => error_response(WatchError::NotFound(format!(
                "{} '{}'",
                route.collection, id
            ))),
            Err(e) => error_response(e),
        },
        None => match list(state, &route.collection, query.unwrap_or("")) {
            Ok(list) => json_response(StatusCode::OK, &list),
            Err(e) => error_response(e),
        },
    }
}

fn list(state: &AppState, collection: &str, query: &str) -> Result<ListResponse> {
    let (filter, options) = parse_query(query)?;
    debug!(collection = collection, filter = ?filter, "Cache query");

    let cursor = state.cache.find(collection, &filter, &options)?;
    let total = cursor.total();
    Ok(ListResponse {
        items: cursor.collect(),
        total,
    })
}

/// Parse a query string into a filter and find options
fn parse_query(query: &str) -> Result<(Filter, FindOptions)> {
    let mut filter = Filter::new();
    let mut options = FindOptions::new().with_limit(DEFAULT_LIMIT);

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);

        match key.as_str() {
            "sort" => {
                let sort = Sort::parse(&value)
                    .ok_or_else(|| WatchError::BadRequest(format!("invalid sort '{}'", value)))?;
                options = options.with_sort(sort);
            }
            "limit" => {
                let limit = parse_count("limit", &value)?;
                options = options.with_limit(limit.min(MAX_LIMIT));
            }
            "skip" => {
                options = options.with_skip(parse_count("skip", &value)?);
            }
            "" => return Err(WatchError::BadRequest("empty query field".into())),
            field => {
                let candidates: Vec<JsonValue> =
                    value.split(',').flat_map(scalar_candidates).collect();
                filter = match candidates.as_slice() {
                    [single] => filter.eq(field, single.clone()),
                    _ => filter.any_of(field, candidates),
                };
            }
        }
    }

    Ok((filter, options))
}

fn parse_count(name: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| WatchError::BadRequest(format!("{} must be a non-negative integer", name)))
}

/// JSON values a query string value may stand for
fn scalar_candidates(raw: &str) -> Vec<JsonValue> {
    let mut out = vec![JsonValue::String(raw.to_string())];
    match raw {
        "true" => out.push(JsonValue::Bool(true)),
        "false" => out.push(JsonValue::Bool(false)),
        "null" => out.push(JsonValue::Null),
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                out.push(JsonValue::from(n));
            } else if let Ok(n) = raw.parse::<f64>() {
                if n.is_finite() {
                    out.push(JsonValue::from(n));
                }
            }
        }
    }
    out
}

/// Decode `%XX` escapes and `+` in a URL component
///
/// Malformed escapes are kept as-is and invalid UTF-8 is replaced.
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::Condition;
    use crate::db::SortOrder;
    use serde_json::json;

    #[test]
    fn test_parse_route() {
        assert_eq!(
            CacheRoute::parse("/api/cache/chat_messages"),
            Some(CacheRoute {
                collection: "chat_messages".into(),
                id: None
            })
        );
        assert_eq!(
            CacheRoute::parse("/api/cache/spaces/alice%3Aprivate"),
            Some(CacheRoute {
                collection: "spaces".into(),
                id: Some("alice:private".into())
            })
        );
        assert!(CacheRoute::parse("/api/cache/").is_none());
        assert!(CacheRoute::parse("/api/other").is_none());
    }

    #[test]
    fn test_parse_query() {
        let (filter, options) =
            parse_query("channelId=general&sort=-sentAt&limit=5000&skip=2").unwrap();

        assert_eq!(
            filter.condition("channelId"),
            Some(&Condition::Eq(json!("general")))
        );
        let sort = options.sort.unwrap();
        assert_eq!(sort.field, "sentAt");
        assert_eq!(sort.order, SortOrder::Descending);
        assert_eq!(options.limit, Some(MAX_LIMIT));
        assert_eq!(options.skip, 2);
    }

    #[test]
    fn test_parse_query_membership_and_numbers() {
        let (filter, options) = parse_query("emoji=%F0%9F%91%8D,heart&version=2").unwrap();

        assert!(filter.matches(&json!({ "emoji": "👍", "version": 2 })));
        assert!(filter.matches(&json!({ "emoji": "heart", "version": "2" })));
        assert!(!filter.matches(&json!({ "emoji": "smile", "version": 2 })));
        assert_eq!(options.limit, Some(DEFAULT_LIMIT));
    }

    #[test]
    fn test_parse_query_rejects_bad_numbers() {
        assert!(matches!(
            parse_query("limit=-1"),
            Err(WatchError::BadRequest(_))
        ));
        assert!(parse_query("sort=-").is_err());
    }

    #[test]
    fn test_decode_component() {
        assert_eq!(decode_component("hello+world"), "hello world");
        assert_eq!(decode_component("a%2Cb"), "a,b");
        assert_eq!(decode_component("100%"), "100%");
        assert_eq!(decode_component("%zz"), "%zz");
        assert_eq!(decode_component("a%2Bb"), "a+b");
        assert_eq!(decode_component("%FF"), "\u{FFFD}");
    }
}
