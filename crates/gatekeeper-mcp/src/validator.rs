//! Bearer-token validation against the trusted IDP set
//!
//! Selection happens before signature verification: the payload is
//! decoded (unverified) just far enough to read `iss` and `aud`, the
//! matching IDP entry is picked, and only that entry's key set and
//! algorithm allow-list are used for the real verification. Several
//! entries may share an issuer and differ by audience or name.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Validation, decode_header};
use serde_json::Value;

use crate::claims::{ClaimSet, OneOrMany, PathError};
use crate::config::IdpConfig;
use crate::error::{AuthError, Result};
use crate::jwks::{JwkSet, JwksCache};

/// Per-call validation overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions<'a> {
    /// Pin validation to the IDP entries carrying this name
    pub idp_name: Option<&'a str>,
    /// Override the IDP's clock skew tolerance for this call
    pub clock_skew_secs: Option<u64>,
    /// Override the IDP's maximum token age for this call
    pub max_token_age_secs: Option<u64>,
}

/// Validates bearer tokens and extracts claim sets
pub struct ClaimValidator {
    idps: Vec<IdpConfig>,
    /// One cache per distinct key-set location
    caches: HashMap<String, Arc<JwksCache>>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for ClaimValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimValidator")
            .field("idps", &self.idps.len())
            .field("caches", &self.caches.len())
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish()
    }
}

impl ClaimValidator {
    #[must_use]
    pub fn new(idps: Vec<IdpConfig>, jwks_ttl: Duration) -> Self {
        let mut caches = HashMap::new();
        for idp in &idps {
            caches
                .entry(idp.jwks_uri.as_str().to_string())
                .or_insert_with(|| Arc::new(JwksCache::new(idp.jwks_uri.clone(), jwks_ttl)));
        }
        Self {
            idps,
            caches,
            initialized: AtomicBool::new(false),
        }
    }

    /// Fetch every stale key set. Idempotent; a failed fetch names the
    /// offending IDP and leaves the validator uninitialized.
    pub async fn initialize(&self) -> Result<()> {
        for (uri, cache) in &self.caches {
            if !cache.needs_refresh() {
                continue;
            }
            if let Err(e) = cache.refresh().await {
                let owner = self
                    .idps
                    .iter()
                    .find(|idp| idp.jwks_uri.as_str() == uri)
                    .map_or_else(|| uri.clone(), IdpConfig::describe);
                return Err(AuthError::Config(format!(
                    "key-set setup failed for IDP {owner}: {e}"
                )));
            }
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Install a key set for one location without fetching.
    ///
    /// For preloaded/offline deployments; `initialize` then skips the
    /// network for locations loaded this way.
    pub fn preload_keys(&self, jwks_uri: &url::Url, jwks: JwkSet) -> Result<usize> {
        let cache = self
            .caches
            .get(jwks_uri.as_str())
            .ok_or_else(|| AuthError::Config(format!("no IDP uses key set {jwks_uri}")))?;
        cache.load_static(jwks)
    }

    /// Shared cache handle for one key-set location, for background
    /// refresh wiring
    #[must_use]
    pub fn cache_for(&self, jwks_uri: &url::Url) -> Option<Arc<JwksCache>> {
        self.caches.get(jwks_uri.as_str()).cloned()
    }

    /// Validate a compact bearer token and extract its claims
    pub async fn validate(&self, token: &str, opts: &ValidateOptions<'_>) -> Result<ClaimSet> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(AuthError::NotInitialized);
        }

        check_format(token)?;
        let peek = peek_payload(token)?;
        let idp = self.select_idp(&peek, opts.idp_name)?;

        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        if !idp.algorithms.contains(&header.alg) {
            return Err(AuthError::AlgorithmNotAllowed(format!("{:?}", header.alg)));
        }

        let cache = self
            .caches
            .get(idp.jwks_uri.as_str())
            .ok_or(AuthError::NotInitialized)?;
        let key = cache.get_key(header.kid.as_deref(), header.alg).await?;

        let skew = opts.clock_skew_secs.unwrap_or(idp.policy.clock_skew_secs);
        let max_age = opts
            .max_token_age_secs
            .unwrap_or(idp.policy.max_token_age_secs);

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[idp.issuer_str()]);
        validation.set_audience(&[idp.audience.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = skew;

        let decoded = jsonwebtoken::decode::<Value>(token, &key, &validation)?;
        let claims = decoded.claims;

        check_temporal(&claims, idp, skew, max_age)?;

        extract(&claims, idp)
    }

    /// IDP entries as configured, for metadata advertisement
    #[must_use]
    pub fn idps(&self) -> &[IdpConfig] {
        &self.idps
    }

    fn select_idp(&self, peek: &PayloadPeek, name: Option<&str>) -> Result<&IdpConfig> {
        let matches = |idp: &IdpConfig| {
            peek.issuer.as_deref() == Some(idp.issuer_str())
                && peek
                    .audience
                    .as_ref()
                    .is_some_and(|aud| aud.contains(&idp.audience))
        };

        if let Some(name) = name {
            let named: Vec<&IdpConfig> = self
                .idps
                .iter()
                .filter(|idp| idp.name.as_deref() == Some(name))
                .collect();

            if let Some(idp) = named.iter().find(|idp| matches(idp)) {
                return Ok(idp);
            }

            // Enumerating the candidates' actual issuer/audience values
            // is what makes multi-IDP setups debuggable.
            let candidates = if named.is_empty() {
                "no IDP carries this name".to_string()
            } else {
                named
                    .iter()
                    .map(|idp| idp.describe())
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(AuthError::IdpMismatch {
                name: name.to_string(),
                candidates,
            });
        }

        self.idps
            .iter()
            .find(|idp| matches(idp))
            .ok_or_else(|| AuthError::UntrustedIssuer {
                issuer: peek.issuer.clone(),
                audience: peek.audience.as_ref().map(|a| a.to_vec().join(",")),
            })
    }
}

struct PayloadPeek {
    issuer: Option<String>,
    audience: Option<OneOrMany>,
}

fn check_format(token: &str) -> Result<()> {
    let mut parts = token.split('.');
    let well_formed = matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty()
    );
    if well_formed {
        Ok(())
    } else {
        Err(AuthError::MalformedToken)
    }
}

/// Decode the payload segment without verifying the signature, reading
/// only `iss` and `aud` for IDP selection
fn peek_payload(token: &str) -> Result<PayloadPeek> {
    let segment = token.split('.').nth(1).ok_or(AuthError::MalformedToken)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::MalformedToken)?;
    let payload: Value = serde_json::from_slice(&bytes).map_err(|_| AuthError::MalformedToken)?;

    let issuer = payload
        .get("iss")
        .and_then(Value::as_str)
        .map(|s| s.trim_end_matches('/').to_string());
    let audience = payload
        .get("aud")
        .cloned()
        .and_then(|v| serde_json::from_value::<OneOrMany>(v).ok());

    Ok(PayloadPeek { issuer, audience })
}

/// Security checks beyond the standard-claim validation.
///
/// exp is re-checked even though the decode step already enforced it;
/// keeping every temporal failure in this one place keeps the error
/// taxonomy uniform.
fn check_temporal(claims: &Value, idp: &IdpConfig, skew: u64, max_age: u64) -> Result<()> {
    let now = unix_now();
    let skew = skew as i64;

    if let Some(azp) = claims.get("azp").and_then(Value::as_str)
        && azp != idp.audience
    {
        return Err(AuthError::AuthorizedPartyMismatch {
            azp: azp.to_string(),
            audience: idp.audience.clone(),
        });
    }

    match claims.get("nbf").and_then(Value::as_i64) {
        None if idp.policy.require_nbf => return Err(AuthError::MissingNotBefore),
        Some(nbf) if nbf > now + skew => return Err(AuthError::TokenNotYetValid),
        _ => {}
    }

    if let Some(iat) = claims.get("iat").and_then(Value::as_i64) {
        let age = now.saturating_sub(iat);
        if age > max_age as i64 {
            return Err(AuthError::TokenTooOld {
                age_secs: age,
                max_secs: max_age,
            });
        }
    }

    if let Some(exp) = claims.get("exp").and_then(Value::as_i64)
        && exp + skew < now
    {
        return Err(AuthError::TokenExpired);
    }

    Ok(())
}

fn extract(claims: &Value, idp: &IdpConfig) -> Result<ClaimSet> {
    let mappings = &idp.mappings;

    let user_id = mappings.user_id.string_at(claims).map_err(|e| match e {
        PathError::NotFound => AuthError::MissingClaim(mappings.user_id.to_string()),
        PathError::WrongType { expected } => AuthError::ClaimsInvalid(format!(
            "claim {} is not a {expected}",
            mappings.user_id
        )),
    })?;

    let display_name = mappings.display_name.string_at(claims).ok();
    let username = mappings.username.string_at(claims).ok();
    let legacy_username = mappings
        .legacy_username
        .as_ref()
        .and_then(|path| path.string_at(claims).ok());

    let roles = match mappings.roles.string_list_at(claims) {
        Ok(roles) => roles,
        Err(PathError::NotFound) => Vec::new(),
        Err(PathError::WrongType { .. }) => {
            tracing::warn!(path = %mappings.roles, "roles claim has unexpected type");
            Vec::new()
        }
    };

    let scopes = mappings.scopes.scopes_at(claims).unwrap_or_default();

    Ok(ClaimSet {
        user_id,
        display_name,
        username,
        legacy_username,
        roles,
        scopes,
        raw: claims.clone(),
    })
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::config::{ClaimMappings, SecurityPolicy};
    use crate::testkeys;

    const ISSUER: &str = "https://idp.example";
    const JWKS: &str = "https://idp.example/jwks";

    fn idp(audience: &str) -> IdpConfig {
        IdpConfig::new(
            Url::parse(ISSUER).unwrap(),
            Url::parse(JWKS).unwrap(),
            audience,
        )
    }

    async fn validator(idps: Vec<IdpConfig>) -> ClaimValidator {
        let v = ClaimValidator::new(idps, Duration::from_secs(3600));
        v.preload_keys(
            &Url::parse(JWKS).unwrap(),
            serde_json::from_str(testkeys::TEST_JWKS_JSON).unwrap(),
        )
        .unwrap();
        v.initialize().await.unwrap();
        v
    }

    fn base_claims(audience: &str) -> serde_json::Value {
        json!({
            "iss": ISSUER,
            "aud": audience,
            "sub": "user123",
            "name": "Test User",
            "preferred_username": "tuser",
            "exp": testkeys::now() + 3600,
            "iat": testkeys::now(),
            "roles": ["admin"],
            "scope": "openid tools:invoke",
        })
    }

    #[tokio::test]
    async fn test_validate_happy_path() {
        let v = validator(vec![idp("api")]).await;
        let token = testkeys::sign(&base_claims("api"));

        let claims = v.validate(&token, &ValidateOptions::default()).await.unwrap();
        assert_eq!(claims.user_id, "user123");
        assert_eq!(claims.display_name.as_deref(), Some("Test User"));
        assert_eq!(claims.username.as_deref(), Some("tuser"));
        assert_eq!(claims.roles, vec!["admin"]);
        assert_eq!(claims.scopes, vec!["openid", "tools:invoke"]);
        assert!(claims.legacy_username.is_none());
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let v = ClaimValidator::new(vec![idp("api")], Duration::from_secs(3600));
        let result = v.validate("a.b.c", &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let v = validator(vec![idp("api")]).await;
        for bad in ["", "onlyone", "two.segments", "a.b.c.d", "..", "a..c"] {
            let result = v.validate(bad, &ValidateOptions::default()).await;
            assert!(
                matches!(result, Err(AuthError::MalformedToken)),
                "expected malformed for {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_untrusted_issuer() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims["iss"] = json!("https://rogue.example");
        let token = testkeys::sign(&claims);

        let result = v.validate(&token, &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::UntrustedIssuer { .. })));
    }

    // Scenario: two entries share an issuer and differ by audience.
    #[tokio::test]
    async fn test_shared_issuer_disambiguated_by_audience() {
        let v = validator(vec![
            idp("api-a").with_name("a"),
            idp("api-b").with_name("b"),
        ])
        .await;

        let token = testkeys::sign(&base_claims("api-a"));
        let claims = v.validate(&token, &ValidateOptions::default()).await.unwrap();
        assert_eq!(claims.user_id, "user123");

        let token = testkeys::sign(&base_claims("api-b"));
        assert!(v.validate(&token, &ValidateOptions::default()).await.is_ok());

        let token = testkeys::sign(&base_claims("api-c"));
        let result = v.validate(&token, &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::UntrustedIssuer { .. })));
    }

    #[tokio::test]
    async fn test_explicit_idp_name_pins_candidates() {
        let v = validator(vec![
            idp("api-a").with_name("a"),
            idp("api-b").with_name("b"),
        ])
        .await;

        // Token minted for api-a cannot validate under the "b" entry,
        // and the error lists the candidate's actual values.
        let token = testkeys::sign(&base_claims("api-a"));
        let opts = ValidateOptions {
            idp_name: Some("b"),
            ..Default::default()
        };
        match v.validate(&token, &opts).await {
            Err(AuthError::IdpMismatch { name, candidates }) => {
                assert_eq!(name, "b");
                assert!(candidates.contains("api-b"));
            }
            other => panic!("expected IdpMismatch, got {other:?}"),
        }

        let opts = ValidateOptions {
            idp_name: Some("a"),
            ..Default::default()
        };
        assert!(v.validate(&token, &opts).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_idp_name() {
        let v = validator(vec![idp("api").with_name("a")]).await;
        let token = testkeys::sign(&base_claims("api"));
        let opts = ValidateOptions {
            idp_name: Some("ghost"),
            ..Default::default()
        };
        assert!(matches!(
            v.validate(&token, &opts).await,
            Err(AuthError::IdpMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_symmetric_algorithm_rejected() {
        let v = validator(vec![idp("api")]).await;
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &base_claims("api"),
            &jsonwebtoken::EncodingKey::from_secret(b"secret-at-least-32-bytes-long!!!"),
        )
        .unwrap();

        let result = v.validate(&token, &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::AlgorithmNotAllowed(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_is_invalid_signature() {
        let v = validator(vec![idp("api")]).await;
        // Tamper with the signature segment
        let token = testkeys::sign(&base_claims("api"));
        let mut parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}A", parts[2]);
        parts[2] = &tampered;
        let forged = parts.join(".");

        let result = v.validate(&forged, &ValidateOptions::default()).await;
        assert!(matches!(
            result,
            Err(AuthError::InvalidSignature | AuthError::InvalidToken)
        ));
    }

    // Scenario: exp ten minutes in the past, tolerance 60s.
    #[tokio::test]
    async fn test_expired_token() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims["exp"] = json!(testkeys::now() - 600);
        let token = testkeys::sign(&claims);

        let result = v.validate(&token, &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_token_too_old_despite_distant_expiry() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims["iat"] = json!(testkeys::now() - 7200);
        claims["exp"] = json!(testkeys::now() + 86_400);
        let token = testkeys::sign(&claims);

        let opts = ValidateOptions {
            max_token_age_secs: Some(3600),
            ..Default::default()
        };
        let result = v.validate(&token, &opts).await;
        assert!(matches!(result, Err(AuthError::TokenTooOld { .. })));
    }

    #[tokio::test]
    async fn test_nbf_required_but_absent() {
        let mut cfg = idp("api");
        cfg.policy = SecurityPolicy {
            require_nbf: true,
            ..Default::default()
        };
        let v = validator(vec![cfg]).await;
        let token = testkeys::sign(&base_claims("api"));

        let result = v.validate(&token, &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::MissingNotBefore)));
    }

    #[tokio::test]
    async fn test_nbf_in_future() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims["nbf"] = json!(testkeys::now() + 3600);
        let token = testkeys::sign(&claims);

        let result = v.validate(&token, &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::TokenNotYetValid)));
    }

    #[tokio::test]
    async fn test_authorized_party_mismatch() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims["azp"] = json!("some-other-client");
        let token = testkeys::sign(&claims);

        let result = v.validate(&token, &ValidateOptions::default()).await;
        match result {
            Err(err @ AuthError::AuthorizedPartyMismatch { .. }) => {
                assert_eq!(err.status(), 403);
            }
            other => panic!("expected AuthorizedPartyMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_matching_azp_accepted() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims["azp"] = json!("api");
        let token = testkeys::sign(&claims);

        assert!(v.validate(&token, &ValidateOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_user_id_is_hard_failure() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims.as_object_mut().unwrap().remove("sub");
        let token = testkeys::sign(&claims);

        let result = v.validate(&token, &ValidateOptions::default()).await;
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[tokio::test]
    async fn test_nested_role_mapping() {
        let mut cfg = idp("api");
        cfg.mappings = ClaimMappings {
            roles: crate::claims::ClaimPath::parse("realm_access.roles"),
            ..Default::default()
        };
        let v = validator(vec![cfg]).await;

        let mut claims = base_claims("api");
        claims.as_object_mut().unwrap().remove("roles");
        claims["realm_access"] = json!({"roles": ["ops", "admin"]});
        let token = testkeys::sign(&claims);

        let extracted = v.validate(&token, &ValidateOptions::default()).await.unwrap();
        assert_eq!(extracted.roles, vec!["ops", "admin"]);
    }

    #[tokio::test]
    async fn test_legacy_username_extraction() {
        let mut cfg = idp("api");
        cfg.mappings.legacy_username = Some(crate::claims::ClaimPath::parse("legacy_name"));
        let v = validator(vec![cfg]).await;

        let mut claims = base_claims("api");
        claims["legacy_name"] = json!("DOMAIN\\tuser");
        let token = testkeys::sign(&claims);

        let extracted = v.validate(&token, &ValidateOptions::default()).await.unwrap();
        assert_eq!(extracted.legacy_username.as_deref(), Some("DOMAIN\\tuser"));
    }

    #[tokio::test]
    async fn test_clock_skew_override_accepts_marginal_expiry() {
        let v = validator(vec![idp("api")]).await;
        let mut claims = base_claims("api");
        claims["exp"] = json!(testkeys::now() - 120);
        let token = testkeys::sign(&claims);

        let opts = ValidateOptions {
            clock_skew_secs: Some(300),
            ..Default::default()
        };
        assert!(v.validate(&token, &opts).await.is_ok());
    }
}
