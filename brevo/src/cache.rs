//! TTL cache in front of the attribute listing endpoint, keyed by a
//! fingerprint of the API key. Callers use this to populate dropdowns
//! and to validate stored attribute references, so lookups never fail:
//! any fetch problem degrades to an empty map.

use crate::fetcher::AttributeFetcher;
use crate::types::AttributeDefinition;
use indexmap::IndexMap;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

const CACHE_CAPACITY: u64 = 64;
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Normalized-name → definition, in the order the API returned them.
pub type AttributeMap = IndexMap<String, AttributeDefinition>;

pub struct AttributeCache {
    base_url: String,
    cache: Cache<String, Arc<AttributeMap>>,
}

fn fingerprint(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl AttributeCache {
    pub fn new(base_url: &str) -> Self {
        Self::with_ttl(base_url, CACHE_TTL)
    }

    pub fn with_ttl(base_url: &str, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();

        AttributeCache {
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
        }
    }

    /// Cached attribute definitions for `api_key`, fetching on a miss.
    /// A refresh replaces the whole entry at once; entries expire after
    /// one hour. Concurrent misses may fetch redundantly, which is fine
    /// since the fetch is idempotent.
    pub async fn get_attributes(&self, api_key: &str) -> Arc<AttributeMap> {
        if api_key.is_empty() {
            tracing::debug!("no API key, returning empty attribute set");
            return Arc::new(AttributeMap::new());
        }

        let key = fingerprint(api_key);

        if let Some(cached) = self.cache.get(&key) {
            metrics::counter!("attribute_cache.hit").increment(1);
            tracing::debug!(count = cached.len(), "returning cached attributes");
            return cached;
        }
        metrics::counter!("attribute_cache.miss").increment(1);

        let fetcher = AttributeFetcher::new(&self.base_url, api_key);
        match fetcher.fetch_all(0).await {
            Ok(raw) => {
                let definitions: AttributeMap = raw
                    .into_iter()
                    .map(|(name, raw)| (name, AttributeDefinition::from_raw(raw)))
                    .collect();
                let definitions = Arc::new(definitions);
                self.cache.insert(key, definitions.clone());
                tracing::debug!(count = definitions.len(), "fetched attributes from API");
                definitions
            }
            Err(err) => {
                metrics::counter!("attribute_cache.fetch_error").increment(1);
                tracing::warn!(error = %err, "attribute fetch failed, returning empty set");
                Arc::new(AttributeMap::new())
            }
        }
    }

    /// Evict the entry for one API key, or every entry when `None`.
    pub fn clear(&self, api_key: Option<&str>) {
        match api_key {
            Some(key) => self.cache.invalidate(&fingerprint(key)),
            None => self.cache.invalidate_all(),
        }
    }
}
