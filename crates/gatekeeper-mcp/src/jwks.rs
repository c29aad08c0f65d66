//! Key-set fetching and caching
//!
//! One [`JwksCache`] exists per distinct key-set location. Cached keys
//! are read-mostly shared state: lookups take a read lock, a refresh
//! swaps the whole map under a short write lock. Concurrent validations
//! may trigger concurrent refreshes of the same location; the operation
//! is idempotent and is never serialized behind a validation-blocking
//! lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, Result};

/// JSON Web Key (asymmetric kinds only; others are skipped on install)
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    /// Key type (RSA, EC)
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub r#use: Option<String>,
    // RSA components
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    // EC components
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

/// JSON Web Key Set document
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Clone)]
struct KeyEntry {
    key: jsonwebtoken::DecodingKey,
    algorithm: jsonwebtoken::Algorithm,
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Thread-safe decoding-key cache for one key-set location
pub struct JwksCache {
    named: RwLock<HashMap<String, KeyEntry>>,
    unnamed: RwLock<Vec<KeyEntry>>,
    jwks_uri: Url,
    client: reqwest::Client,
    ttl: Duration,
    last_refresh: RwLock<Option<Instant>>,
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("jwks_uri", &self.jwks_uri)
            .field("ttl", &self.ttl)
            .field("named_keys", &self.named.read().len())
            .finish_non_exhaustive()
    }
}

impl JwksCache {
    #[must_use]
    pub fn new(jwks_uri: Url, ttl: Duration) -> Self {
        Self {
            named: RwLock::new(HashMap::new()),
            unnamed: RwLock::new(Vec::new()),
            jwks_uri,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("valid client"),
            ttl,
            last_refresh: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Look up a decoding key, refreshing from the remote on TTL expiry
    pub async fn get_key(
        &self,
        kid: Option<&str>,
        alg: jsonwebtoken::Algorithm,
    ) -> Result<jsonwebtoken::DecodingKey> {
        if self.needs_refresh() {
            self.refresh().await?;
        }

        if let Some(kid) = kid {
            let found = {
                let named = self.named.read();
                named
                    .get(kid)
                    .filter(|entry| entry.algorithm == alg)
                    .map(|entry| entry.key.clone())
            };
            return found.ok_or_else(|| AuthError::KeyNotFound(kid.to_string()));
        }

        {
            let unnamed = self.unnamed.read();
            if let Some(entry) = unnamed.iter().find(|e| e.algorithm == alg) {
                return Ok(entry.key.clone());
            }
        }

        {
            let named = self.named.read();
            if let Some(entry) = named.values().find(|e| e.algorithm == alg) {
                return Ok(entry.key.clone());
            }
        }

        Err(AuthError::NoMatchingKey)
    }

    /// Fetch the key set from the remote location and install it
    pub async fn refresh(&self) -> Result<()> {
        tracing::debug!(jwks_uri = %self.jwks_uri, "refreshing JWKS");

        let response = self
            .client
            .get(self.jwks_uri.clone())
            .send()
            .await
            .map_err(AuthError::JwksFetch)?;

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::JwksParse(e.to_string()))?;

        let installed = self.install(jwks)?;
        tracing::info!(jwks_uri = %self.jwks_uri, keys = installed, "JWKS refreshed");
        Ok(())
    }

    /// Install a key set directly, bypassing the fetch.
    ///
    /// Used for preloaded/offline deployments and tests. Marks the
    /// cache fresh so the next lookup does not trigger a fetch.
    pub fn load_static(&self, jwks: JwkSet) -> Result<usize> {
        self.install(jwks)
    }

    fn install(&self, jwks: JwkSet) -> Result<usize> {
        let mut named = HashMap::new();
        let mut unnamed = Vec::new();

        for jwk in jwks.keys {
            let Some((key, algorithm)) = decode_jwk(&jwk)? else {
                continue;
            };
            let entry = KeyEntry { key, algorithm };
            match &jwk.kid {
                Some(kid) => {
                    named.insert(kid.clone(), entry);
                }
                None => unnamed.push(entry),
            }
        }

        let count = named.len() + unnamed.len();
        *self.named.write() = named;
        *self.unnamed.write() = unnamed;
        *self.last_refresh.write() = Some(Instant::now());
        Ok(count)
    }

    pub(crate) fn needs_refresh(&self) -> bool {
        self.last_refresh
            .read()
            .is_none_or(|t| t.elapsed() > self.ttl)
    }
}

fn decode_jwk(jwk: &Jwk) -> Result<Option<(jsonwebtoken::DecodingKey, jsonwebtoken::Algorithm)>> {
    let alg = match jwk.alg.as_deref() {
        Some("RS256") => jsonwebtoken::Algorithm::RS256,
        Some("RS384") => jsonwebtoken::Algorithm::RS384,
        Some("RS512") => jsonwebtoken::Algorithm::RS512,
        Some("ES256") => jsonwebtoken::Algorithm::ES256,
        Some("ES384") => jsonwebtoken::Algorithm::ES384,
        None => match jwk.kty.as_str() {
            "RSA" => jsonwebtoken::Algorithm::RS256,
            "EC" => match jwk.crv.as_deref() {
                Some("P-256") => jsonwebtoken::Algorithm::ES256,
                Some("P-384") => jsonwebtoken::Algorithm::ES384,
                _ => return Ok(None),
            },
            _ => return Ok(None),
        },
        // Symmetric and unknown algorithms are never installed
        _ => return Ok(None),
    };

    let key = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("missing 'n' in RSA key".into()))?;
            let e = jwk
                .e
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("missing 'e' in RSA key".into()))?;
            jsonwebtoken::DecodingKey::from_rsa_components(n, e)
                .map_err(|e| AuthError::JwksParse(format!("invalid RSA components: {e}")))?
        }
        "EC" => {
            let x = jwk
                .x
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("missing 'x' in EC key".into()))?;
            let y = jwk
                .y
                .as_ref()
                .ok_or_else(|| AuthError::JwksParse("missing 'y' in EC key".into()))?;
            jsonwebtoken::DecodingKey::from_ec_components(x, y)
                .map_err(|e| AuthError::JwksParse(format!("invalid EC components: {e}")))?
        }
        other => {
            tracing::debug!(kty = other, "skipping unsupported key type");
            return Ok(None);
        }
    };

    Ok(Some((key, alg)))
}

/// Background refresh loop for one cache
pub struct JwksRefreshTask {
    cache: Arc<JwksCache>,
    interval: Duration,
}

impl std::fmt::Debug for JwksRefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksRefreshTask")
            .field("cache", &self.cache)
            .field("interval", &self.interval)
            .finish()
    }
}

impl JwksRefreshTask {
    #[must_use]
    pub const fn new(cache: Arc<JwksCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    pub fn spawn(
        self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.cache.refresh().await {
                            tracing::warn!(error = %e, "background JWKS refresh failed");
                        }
                    }
                    () = shutdown.cancelled() => {
                        tracing::debug!("JWKS refresh task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
