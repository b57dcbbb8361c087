use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Tokens are refreshed this long before they actually expire
const REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// A token together with its absolute expiry.
#[derive(Clone, Debug)]
pub struct CachedToken {
    /// The authentication token string
    pub token: String,
    /// When the token expires
    pub expires_at: Instant,
    /// The type of token (e.g., "Bearer")
    pub token_type: String,
}

impl CachedToken {
    pub fn new(token: String, expires_in: Duration, token_type: String) -> Self {
        Self {
            token,
            expires_at: Instant::now() + expires_in,
            token_type,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Uses a 5-minute buffer so tokens are renewed before they lapse.
    pub fn needs_refresh(&self) -> bool {
        Instant::now() + REFRESH_BUFFER >= self.expires_at
    }
}

/// Tokens keyed by scope set, shared between clones.
#[derive(Clone)]
pub struct TokenCache {
    cache: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cached token for `key` unless it is due for refresh
    pub async fn get_fresh(&self, key: &str) -> Option<CachedToken> {
        let cache = self.cache.read().await;
        cache.get(key).filter(|token| !token.needs_refresh()).cloned()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|token| !token.is_expired())
            .map(|token| token.token.clone())
    }

    pub async fn set(&self, key: String, token: CachedToken) {
        let mut cache = self.cache.write().await;
        cache.insert(key, token);
    }

    pub async fn invalidate(&self, key: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(key);
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
