//! Redis cache for expensive, repeatable reads.
//!
//! Values are stored as JSON. Every failure is logged and swallowed on the
//! read side so a cache outage degrades to recomputation.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Upper bound on SCAN round trips for one invalidation
const MAX_SCAN_ROUNDS: usize = 100;

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    default_ttl: Duration,
}

impl RedisCache {
    pub async fn new(redis_url: &str, default_ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!(ttl_secs = default_ttl_seconds, "Redis cache connected");

        Ok(Self {
            conn,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        })
    }

    #[instrument(skip(self), fields(cache_hit))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();

        let hit = match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Dropping undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!(key, error = %e, "Redis get error");
                None
            }
        };

        tracing::Span::current().record("cache_hit", hit.is_some());
        debug!(key, hit = hit.is_some(), "Cache lookup");
        hit
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    #[instrument(skip(self, value))]
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let data = serde_json::to_string(value).context("Failed to serialize value for cache")?;

        conn.set_ex::<_, _, ()>(key, data, ttl.as_secs())
            .await
            .context("Failed to set cache value")?;

        debug!(key, ttl_secs = ttl.as_secs(), "Cached value");
        Ok(())
    }

    /// Store a value, logging instead of failing.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.set(key, value).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Delete every key matching a glob pattern, walking the full SCAN cursor.
    #[instrument(skip(self))]
    pub async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        for _ in 0..MAX_SCAN_ROUNDS {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .context("Failed to scan cache keys")?;

            if !keys.is_empty() {
                let deleted: i32 = conn.del(&keys).await.context("Failed to delete cache keys")?;
                removed += deleted.max(0) as usize;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern, removed, "Cache pattern delete");
        Ok(removed)
    }

    /// Invalidate by pattern, logging instead of failing.
    pub async fn evict(&self, pattern: &str) {
        if let Err(e) = self.delete_pattern(pattern).await {
            warn!(pattern, error = %e, "Cache invalidation failed");
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

/// Cache key builders.
pub mod keys {
    use uuid::Uuid;

    /// Parse result for a document at a given page limit
    pub fn parse_result(document_id: Uuid, max_pages: u32) -> String {
        format!("parse:document:{}:pages:{}", document_id, max_pages)
    }

    /// Every cached parse of a document
    pub fn parse_pattern(document_id: Uuid) -> String {
        format!("parse:document:{}:*", document_id)
    }

    /// Distinct material categories for a company
    pub fn material_categories(company_id: Uuid) -> String {
        format!("materials:company:{}:categories", company_id)
    }

    pub fn ai_status() -> String {
        "ai:status".to_string()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parse_keys_share_the_invalidation_prefix() {
            let id = Uuid::nil();
            let key = parse_result(id, 5);
            assert_eq!(
                key,
                "parse:document:00000000-0000-0000-0000-000000000000:pages:5"
            );
            let prefix = parse_pattern(id);
            assert!(key.starts_with(prefix.trim_end_matches('*')));
        }
    }
}
