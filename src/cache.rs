//! Response cache, backed by Redis.
//!
//! Memoizes complete responses keyed by `(base_path, full_path, method, query)`.
//! Base-path discovery is itself cached: candidates are probed with a single
//! `MGET` instead of one round trip per candidate.

use anyhow::Result;
use redis::AsyncCommands;

use crate::config::Settings;
use crate::models::Domain;

const GUARD_PRESENT_SUFFIX: &str = "GUARD_PRESENT";

/// A fully-formed cached response: status, a flat header list, and the body.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct ResponseCache {
    client: redis::Client,
    ttl_secs: u64,
}

/// The `full_path` half of a cache entry key: the domain-qualified request path, matching
/// whatever `CACHE_ENABLED` request handling used to populate the entry in the first place.
pub fn cache_scope(settings: &Settings, domain: &Domain, path: &str) -> String {
    if settings.domain_enabled {
        format!("{}/{path}", domain.name)
    } else {
        path.to_string()
    }
}

impl ResponseCache {
    pub fn new(redis_url: &str, ttl_secs: u64) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            ttl_secs,
        })
    }

    fn base_key(base_path: &str) -> String {
        format!("gateway:base:{base_path}")
    }

    fn entry_key(base_path: &str, full_path: &str, method: &str, query: &str) -> String {
        format!("gateway:resp:{base_path}:{method}:{full_path}?{query}")
    }

    fn guard_present_key(base_path: &str) -> String {
        format!("{}:{}", Self::base_key(base_path), GUARD_PRESENT_SUFFIX)
    }

    /// Probes every candidate base path (longest-prefix-first) in one `MGET` and
    /// returns the first one already registered as a known base path.
    pub async fn discover_base_path(&self, candidates: &[String]) -> Result<Option<String>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = candidates.iter().map(|c| Self::base_key(c)).collect();
        let values: Vec<Option<String>> = conn.mget(&keys).await?;
        Ok(values
            .into_iter()
            .zip(candidates)
            .find_map(|(v, candidate)| v.map(|_| candidate.clone())))
    }

    pub async fn register_base_path(&self, base_path: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(Self::base_key(base_path), "1").await?;
        Ok(())
    }

    /// Returns the cached `DISTRO#GUARD#PRESENT` hint, if any.
    pub async fn guard_present_hint(&self, base_path: &str) -> Result<Option<bool>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<bool> = conn.get(Self::guard_present_key(base_path)).await?;
        Ok(value)
    }

    pub async fn set_guard_present_hint(&self, base_path: &str, present: bool) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(Self::guard_present_key(base_path), present).await?;
        Ok(())
    }

    pub async fn get_response(
        &self,
        base_path: &str,
        full_path: &str,
        method: &str,
        query: &str,
    ) -> Result<Option<CachedResponse>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::entry_key(base_path, full_path, method, query);
        let raw: Option<Vec<u8>> = conn.get(key).await?;
        Ok(match raw {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        })
    }

    pub async fn put_response(
        &self,
        base_path: &str,
        full_path: &str,
        method: &str,
        query: &str,
        response: &CachedResponse,
    ) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::entry_key(base_path, full_path, method, query);
        let bytes = serde_json::to_vec(response)?;
        let _: () = conn.set_ex(key, bytes, self.ttl_secs).await?;
        Ok(())
    }
}

impl serde::Serialize for CachedResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("CachedResponse", 3)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("headers", &self.headers)?;
        s.serialize_field("body", &self.body)?;
        s.end()
    }
}

impl<'de> serde::Deserialize<'de> for CachedResponse {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct Raw {
            status: u16,
            headers: Vec<(String, String)>,
            body: Vec<u8>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(CachedResponse {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
        })
    }
}

#[test]
fn test_base_key_format() {
    assert_eq!(ResponseCache::base_key("foo/bar"), "gateway:base:foo/bar");
}

#[test]
fn test_entry_key_distinguishes_method() {
    let get_key = ResponseCache::entry_key("foo", "foo/bar.txt", "GET", "");
    let head_key = ResponseCache::entry_key("foo", "foo/bar.txt", "HEAD", "");
    assert_ne!(get_key, head_key);
}
