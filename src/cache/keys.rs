//! Cache key definitions.
//!
//! Every key this crate writes is built here so that the prefixes used for
//! writes and the patterns used for invalidation cannot drift apart.

use sha2::{Digest, Sha256};
use url::form_urlencoded;

/// Prefix of every response-cache record.
pub const RESPONSE_PREFIX: &str = "cache:";
const COUNTER_PREFIX: &str = "counter:";
const FLAG_PREFIX: &str = "flag:";
const RATE_PREFIX: &str = "rate:";

/// Hot counter for one field of one subject, e.g. `counter:post1:likes`.
pub fn counter_key(subject_id: &str, field: &str) -> String {
    format!("{COUNTER_PREFIX}{subject_id}:{field}")
}

/// Per-user boolean mirror, e.g. `flag:u42:post1`.
pub fn user_flag_key(user_id: &str, subject_id: &str) -> String {
    format!("{FLAG_PREFIX}{user_id}:{subject_id}")
}

/// Fixed-window rate bucket for a caller-defined identity.
pub fn rate_key(identity: &str) -> String {
    format!("{RATE_PREFIX}{identity}")
}

/// Response-cache key from the request target.
///
/// The path is normalized, query pairs are sorted so that parameter order
/// does not split the cache, and `user` appends a `:user=<id>` suffix for
/// per-user entries.
pub fn response_key(path: &str, query: Option<&str>, user: Option<&str>) -> String {
    let mut key = String::with_capacity(RESPONSE_PREFIX.len() + path.len() + 16);
    key.push_str(RESPONSE_PREFIX);
    key.push_str(&normalize_path(path));

    let query = canonical_query(query.unwrap_or(""));
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query);
    }

    if let Some(user) = user {
        key.push_str(":user=");
        key.push_str(user);
    }

    key
}

/// Collapse repeated slashes and drop a trailing slash, keeping `/` itself.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Decode, sort by name then value, and re-encode query parameters.
pub fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Weak entity tag identifying one cache entry: the key and the exact body
/// it was stored with.
pub fn entity_tag(key: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(body);
    let digest = hasher.finalize();
    format!("W/\"{}\"", hex::encode(&digest.as_slice()[..16]))
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Accepts `*` and comma-separated lists, comparing weakly.
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    let wanted = strip_weak(etag);
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || strip_weak(candidate) == wanted)
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_and_flag_keys() {
        assert_eq!(counter_key("post1", "likes"), "counter:post1:likes");
        assert_eq!(user_flag_key("u42", "post1"), "flag:u42:post1");
        assert_eq!(rate_key("10.0.0.1:/api/things"), "rate:10.0.0.1:/api/things");
    }

    #[test]
    fn response_key_without_query() {
        assert_eq!(response_key("/api/things", None, None), "cache:/api/things");
        assert_eq!(response_key("/api/things", Some(""), None), "cache:/api/things");
    }

    #[test]
    fn response_key_is_order_insensitive() {
        let a = response_key("/api/things", Some("page=2&sort=asc"), None);
        let b = response_key("/api/things", Some("sort=asc&page=2"), None);
        assert_eq!(a, b);
        assert_eq!(a, "cache:/api/things?page=2&sort=asc");
    }

    #[test]
    fn response_key_distinguishes_values() {
        assert_ne!(
            response_key("/api/things", Some("page=1"), None),
            response_key("/api/things", Some("page=2"), None)
        );
    }

    #[test]
    fn response_key_normalizes_path() {
        assert_eq!(
            response_key("/api//things/", None, None),
            response_key("/api/things", None, None)
        );
        assert_eq!(response_key("/", None, None), "cache:/");
        assert_eq!(response_key("", None, None), "cache:/");
    }

    #[test]
    fn response_key_appends_user() {
        assert_eq!(
            response_key("/api/me", Some("x=1"), Some("42")),
            "cache:/api/me?x=1:user=42"
        );
    }

    #[test]
    fn response_key_canonicalizes_encoding() {
        assert_eq!(
            response_key("/s", Some("q=a%20b"), None),
            response_key("/s", Some("q=a+b"), None)
        );
    }

    #[test]
    fn response_keys_match_invalidation_prefix() {
        let key = response_key("/api/things", Some("page=3"), Some("7"));
        assert!(key.starts_with("cache:/api/things"));
    }

    #[test]
    fn entity_tag_depends_on_key_and_body() {
        let tag = entity_tag("cache:/a", b"{}");
        assert!(tag.starts_with("W/\""));
        assert_eq!(tag, entity_tag("cache:/a", b"{}"));
        assert_ne!(tag, entity_tag("cache:/b", b"{}"));
        assert_ne!(tag, entity_tag("cache:/a", b"[]"));
    }

    #[test]
    fn if_none_match_variants() {
        let tag = entity_tag("cache:/a", b"{}");
        assert!(if_none_match_matches(&tag, &tag));
        assert!(if_none_match_matches("*", &tag));
        assert!(if_none_match_matches(&format!("\"x\", {tag}"), &tag));
        assert!(if_none_match_matches(tag.trim_start_matches("W/"), &tag));
        assert!(!if_none_match_matches("\"other\"", &tag));
    }
}
