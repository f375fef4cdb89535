//! Provider signing-key (JWKS) fetching and caching.
//!
//! ID tokens returned by the token endpoint are verified against the
//! provider's published RSA keys. Keys are cached by `kid` and refreshed
//! when the TTL lapses or an unknown `kid` shows up (key rotation).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID, matched against the JWT header `kid`
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use ("sig" or "enc")
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

#[derive(Default)]
struct CacheState {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

/// Thread-safe JWKS cache.
pub struct JwksCache {
    jwks_url: String,
    cache_ttl: Duration,
    /// Serve keys past their TTL when the endpoint is down.
    allow_stale: bool,
    state: RwLock<CacheState>,
    client: reqwest::Client,
}

impl JwksCache {
    pub fn new(jwks_url: impl Into<String>, cache_ttl_seconds: u64, allow_stale: bool) -> Self {
        Self::with_client(
            jwks_url,
            cache_ttl_seconds,
            allow_stale,
            reqwest::Client::new(),
        )
    }

    /// Create a cache that fetches through an existing HTTP client.
    pub fn with_client(
        jwks_url: impl Into<String>,
        cache_ttl_seconds: u64,
        allow_stale: bool,
        client: reqwest::Client,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            allow_stale,
            state: RwLock::new(CacheState::default()),
            client,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Get a decoding key by key ID.
    ///
    /// If `kid` is None, returns any cached key. Fetches from the endpoint
    /// when the cache is stale or the key is unknown.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksCacheError> {
        let fresh = {
            let state = self.state.read().await;
            state
                .fetched_at
                .is_some_and(|t| t.elapsed() <= self.cache_ttl)
        };

        if fresh && let Some(key) = self.get_from_cache(kid).await {
            return Ok(key);
        }

        match self.fetch_keys().await {
            Ok(()) => self.get_from_cache(kid).await.ok_or_else(|| match kid {
                Some(k) => JwksCacheError::KeyNotFound(k.to_string()),
                None => JwksCacheError::NoKeysAvailable,
            }),
            Err(e) => {
                if self.allow_stale && self.stale_usable().await {
                    warn!("JWKS fetch failed, using stale cache: {}", e);
                    if let Some(key) = self.get_from_cache(kid).await {
                        return Ok(key);
                    }
                }
                Err(e)
            }
        }
    }

    async fn stale_usable(&self) -> bool {
        self.state
            .read()
            .await
            .fetched_at
            .is_some_and(|t| t.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS))
    }

    async fn get_from_cache(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let state = self.state.read().await;
        match kid {
            Some(k) => state.keys.get(k).cloned(),
            None => state.keys.values().next().cloned(),
        }
    }

    /// Fetch keys from the JWKS endpoint, replacing the cache.
    pub async fn fetch_keys(&self) -> Result<(), JwksCacheError> {
        debug!("Fetching JWKS from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksCacheError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksCacheError::FetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksCacheError::ParseError(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key: {:?}", jwk.kty);
                continue;
            }
            if jwk.key_use.as_deref() == Some("enc") {
                continue;
            }

            match Self::jwk_to_decoding_key(&jwk) {
                Ok(key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                    keys.insert(kid, key);
                }
                Err(e) => warn!("Failed to parse JWK: {}", e),
            }
        }

        if keys.is_empty() {
            return Err(JwksCacheError::NoValidKeys);
        }

        let mut state = self.state.write().await;
        debug!("Cached {} signing keys", keys.len());
        state.keys = keys;
        state.fetched_at = Some(Instant::now());
        Ok(())
    }

    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, JwksCacheError> {
        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'n' in RSA key".to_string()))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'e' in RSA key".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| JwksCacheError::ParseError(format!("Invalid RSA components: {}", e)))
    }

    pub async fn key_count(&self) -> usize {
        self.state.read().await.keys.len()
    }

    /// Forget all keys; the next lookup refetches.
    pub async fn clear(&self) {
        *self.state.write().await = CacheState::default();
    }
}

/// Errors that can occur when working with the JWKS cache.
#[derive(Debug, Clone)]
pub enum JwksCacheError {
    /// Failed to fetch JWKS from endpoint.
    FetchError(String),
    /// Failed to parse JWKS response.
    ParseError(String),
    /// No usable keys in the document.
    NoValidKeys,
    /// Key with specified kid not found.
    KeyNotFound(String),
    /// No keys available in cache.
    NoKeysAvailable,
}

impl std::fmt::Display for JwksCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available in cache"),
        }
    }
}

impl std::error::Error for JwksCacheError {}
