//! Auth token cache.
//!
//! Tokens are cached per identity, where identity is the combination of
//! token endpoint, audience, target header and a fingerprint of the token
//! request payload. Two projects sharing the same identity share a token;
//! any difference in the payload yields a separate cache slot.

use domain::models::AuthDescriptor;
use shared::hashing::payload_fingerprint;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// A token within this margin of expiry is treated as already expired, so
/// an in-flight request never carries a token that lapses mid-call.
pub const TOKEN_SAFETY_MARGIN_SECS: u64 = 60;

/// Default cached lifetime when the token endpoint reports no expiry.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3300;

/// Cache key identifying one token-granting identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenCacheKey {
    pub token_url: String,
    pub audience: String,
    pub header_key: String,
    pub payload_fingerprint: String,
}

impl TokenCacheKey {
    /// Build the cache key for an auth descriptor.
    pub fn for_descriptor(auth: &AuthDescriptor) -> Self {
        Self {
            token_url: auth.token_url.clone(),
            audience: auth.audience.clone().unwrap_or_default(),
            header_key: auth.header_key.clone(),
            payload_fingerprint: payload_fingerprint(&auth.payload),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// In-process token cache keyed by [`TokenCacheKey`].
pub struct TokenCache {
    entries: RwLock<HashMap<TokenCacheKey, CachedToken>>,
    default_ttl: Duration,
}

impl TokenCache {
    /// Create a cache with the given default token lifetime.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Look up a live token, applying the safety margin.
    pub async fn get(&self, key: &TokenCacheKey) -> Option<String> {
        let entries = self.entries.read().await;
        let cached = entries.get(key)?;
        let margin = Duration::from_secs(TOKEN_SAFETY_MARGIN_SECS);

        if cached.expires_at.checked_duration_since(Instant::now())? > margin {
            Some(cached.value.clone())
        } else {
            None
        }
    }

    /// Store a token, with an explicit lifetime or the cache default.
    pub async fn insert(&self, key: TokenCacheKey, token: String, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let cached = CachedToken {
            value: token,
            expires_at: Instant::now() + ttl,
        };

        let mut entries = self.entries.write().await;
        entries.insert(key, cached);
    }

    /// Drop a token, forcing the next caller to fetch a fresh one.
    pub async fn invalidate(&self, key: &TokenCacheKey) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    /// Evict expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let margin = Duration::from_secs(TOKEN_SAFETY_MARGIN_SECS);
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();

        entries.retain(|_, cached| {
            cached
                .expires_at
                .checked_duration_since(now)
                .is_some_and(|left| left > margin)
        });

        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed = removed, "Purged expired auth tokens");
        }
        removed
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TOKEN_TTL_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(payload: serde_json::Value) -> AuthDescriptor {
        serde_json::from_value(json!({
            "tokenUrl": "https://idp.example.com/token",
            "payload": payload
        }))
        .unwrap()
    }

    fn key() -> TokenCacheKey {
        TokenCacheKey::for_descriptor(&descriptor(json!({"grant_type": "client_credentials"})))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = TokenCache::default();
        cache
            .insert(key(), "tok-1".to_string(), Some(Duration::from_secs(600)))
            .await;

        assert_eq!(cache.get(&key()).await, Some("tok-1".to_string()));
    }

    #[tokio::test]
    async fn test_miss_on_unknown_key() {
        let cache = TokenCache::default();
        assert_eq!(cache.get(&key()).await, None);
    }

    #[tokio::test]
    async fn test_token_within_safety_margin_is_expired() {
        let cache = TokenCache::default();
        // 30s left is inside the 60s margin
        cache
            .insert(key(), "tok-1".to_string(), Some(Duration::from_secs(30)))
            .await;

        assert_eq!(cache.get(&key()).await, None);
    }

    #[tokio::test]
    async fn test_payload_changes_cache_identity() {
        let cache = TokenCache::default();
        let key_a =
            TokenCacheKey::for_descriptor(&descriptor(json!({"client_id": "a"})));
        let key_b =
            TokenCacheKey::for_descriptor(&descriptor(json!({"client_id": "b"})));
        assert_ne!(key_a, key_b);

        cache
            .insert(key_a.clone(), "tok-a".to_string(), Some(Duration::from_secs(600)))
            .await;

        assert_eq!(cache.get(&key_a).await, Some("tok-a".to_string()));
        assert_eq!(cache.get(&key_b).await, None);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = TokenCache::default();
        cache
            .insert(key(), "tok-1".to_string(), Some(Duration::from_secs(600)))
            .await;
        cache.invalidate(&key()).await;

        assert_eq!(cache.get(&key()).await, None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = TokenCache::default();
        cache
            .insert(key(), "tok-1".to_string(), Some(Duration::from_secs(1)))
            .await;
        let other = TokenCacheKey::for_descriptor(&descriptor(json!({"client_id": "x"})));
        cache
            .insert(other.clone(), "tok-2".to_string(), Some(Duration::from_secs(600)))
            .await;

        let removed = cache.purge_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.get(&other).await, Some("tok-2".to_string()));
    }
}
