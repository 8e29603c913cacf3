// ABOUTME: Access-token revocation blacklist behind a trait seam
// ABOUTME: Redis-backed in production, in-memory for tests and redis-less deployments
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! Access tokens are stateless JWTs, so revocation is a denylist: a revoked
//! token's raw value is stored with a TTL matching its remaining lifetime and
//! checked on every verification. Entries expire on their own once the token
//! would have expired anyway.

use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const BLACKLIST_KEY_PREFIX: &str = "blacklist:";

/// Revocation store for stateless access tokens
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Mark a token revoked for `ttl_secs` seconds
    async fn revoke(&self, token: &str, ttl_secs: u64) -> AppResult<()>;

    /// Check whether a token has been revoked
    async fn is_revoked(&self, token: &str) -> AppResult<bool>;
}

/// Redis-backed blacklist using `SET EX` / `EXISTS`
pub struct RedisBlacklist {
    manager: redis::aio::ConnectionManager,
}

impl RedisBlacklist {
    /// Connect to redis and build a managed connection
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::config(format!("Invalid redis URL: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::internal(format!("Failed to connect to redis: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl TokenBlacklist for RedisBlacklist {
    async fn revoke(&self, token: &str, ttl_secs: u64) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let key = format!("{BLACKLIST_KEY_PREFIX}{token}");
        let () = conn
            .set_ex(key, "1", ttl_secs)
            .await
            .map_err(|e| AppError::internal(format!("Failed to blacklist token: {e}")))?;
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        let key = format!("{BLACKLIST_KEY_PREFIX}{token}");
        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| AppError::internal(format!("Failed to check blacklist: {e}")))?;
        Ok(exists)
    }
}

/// In-memory blacklist with expiry, for tests and redis-less deployments.
/// Entries are dropped lazily on access.
#[derive(Default)]
pub struct MemoryBlacklist {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryBlacklist {
    /// Create an empty blacklist
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for MemoryBlacklist {
    async fn revoke(&self, token: &str, ttl_secs: u64) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(token.to_string(), Instant::now() + Duration::from_secs(ttl_secs));
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> AppResult<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, expires| *expires > now);
        Ok(entries.contains_key(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_blacklist_revoke_and_check() {
        let blacklist = MemoryBlacklist::new();
        assert!(!blacklist.is_revoked("tok").await.unwrap());

        blacklist.revoke("tok", 60).await.unwrap();
        assert!(blacklist.is_revoked("tok").await.unwrap());
        assert!(!blacklist.is_revoked("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_blacklist_entries_expire() {
        let blacklist = MemoryBlacklist::new();
        blacklist.revoke("tok", 0).await.unwrap();
        assert!(!blacklist.is_revoked("tok").await.unwrap());
    }
}
