//! Authentication configuration types
//!
//! All configuration is immutable after load. The process start-up code
//! (out of scope here) loads one [`AuthConfig`] and hands it to the
//! validator/resolver/builder; nothing in this crate mutates it.

use std::collections::HashMap;
use std::path::Path;

use jsonwebtoken::Algorithm;
use serde::Deserialize;
use url::Url;

use crate::claims::ClaimPath;
use crate::constants::{ROLE_ADMIN, ROLE_GUEST, ROLE_MAPPING_FAILED, ROLE_USER};
use crate::error::{AuthError, Result};

/// Asymmetric signature algorithms this crate will ever accept.
///
/// Symmetric algorithms and "none" are rejected at parse time; a shared
/// secret in a multi-IDP deployment would let any one IDP mint tokens
/// for the others.
const ALLOWED_ALGORITHMS: &[(&str, Algorithm)] = &[
    ("RS256", Algorithm::RS256),
    ("RS384", Algorithm::RS384),
    ("RS512", Algorithm::RS512),
    ("ES256", Algorithm::ES256),
    ("ES384", Algorithm::ES384),
];

/// Parse an algorithm name against the asymmetric allow-list
pub fn parse_algorithm(name: &str) -> Result<Algorithm> {
    ALLOWED_ALGORITHMS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, alg)| *alg)
        .ok_or_else(|| AuthError::AlgorithmNotAllowed(name.to_string()))
}

/// Canonical name for an allowed algorithm
#[must_use]
pub fn algorithm_name(alg: Algorithm) -> &'static str {
    ALLOWED_ALGORITHMS
        .iter()
        .find(|(_, a)| *a == alg)
        .map_or("unknown", |(n, _)| n)
}

fn deserialize_algorithms<'de, D>(deserializer: D) -> std::result::Result<Vec<Algorithm>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let names = Vec::<String>::deserialize(deserializer)?;
    names
        .iter()
        .map(|n| parse_algorithm(n).map_err(serde::de::Error::custom))
        .collect()
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

/// Claim-path mappings for one IDP.
///
/// Only the user-id path is mandatory at extraction time; the others are
/// tolerated as absent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimMappings {
    pub user_id: ClaimPath,
    pub display_name: ClaimPath,
    pub username: ClaimPath,
    pub legacy_username: Option<ClaimPath>,
    pub roles: ClaimPath,
    pub scopes: ClaimPath,
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            user_id: ClaimPath::parse("sub"),
            display_name: ClaimPath::parse("name"),
            username: ClaimPath::parse("preferred_username"),
            legacy_username: None,
            roles: ClaimPath::parse("roles"),
            scopes: ClaimPath::parse("scope"),
        }
    }
}

/// Temporal security policy for one IDP
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Clock skew tolerance for exp/nbf checks, in seconds
    pub clock_skew_secs: u64,
    /// Maximum accepted age since iat, in seconds
    pub max_token_age_secs: u64,
    /// Reject tokens without an nbf claim
    pub require_nbf: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            clock_skew_secs: 60,
            max_token_age_secs: 86_400,
            require_nbf: false,
        }
    }
}

/// One trusted identity provider.
///
/// Several entries may share an issuer and differ only by audience or
/// name; that is how a requestor token and a delegation token from the
/// same IDP validate against different audiences.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpConfig {
    /// Optional name used for explicit selection and error messages
    #[serde(default)]
    pub name: Option<String>,
    /// Expected `iss` value
    pub issuer: Url,
    /// Key-set location for signature verification
    pub jwks_uri: Url,
    /// Expected audience; a token's `aud` list must contain it
    pub audience: String,
    /// Allowed signature algorithms (asymmetric only)
    #[serde(
        default = "default_algorithms",
        deserialize_with = "deserialize_algorithms"
    )]
    pub algorithms: Vec<Algorithm>,
    /// Claim-path mappings
    #[serde(default)]
    pub mappings: ClaimMappings,
    /// Temporal policy
    #[serde(default)]
    pub policy: SecurityPolicy,
}

impl IdpConfig {
    pub fn new(issuer: Url, jwks_uri: Url, audience: impl Into<String>) -> Self {
        Self {
            name: None,
            issuer,
            jwks_uri,
            audience: audience.into(),
            algorithms: default_algorithms(),
            mappings: ClaimMappings::default(),
            policy: SecurityPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    #[must_use]
    pub fn with_mappings(mut self, mappings: ClaimMappings) -> Self {
        self.mappings = mappings;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Issuer with any trailing slash removed, for comparison
    #[must_use]
    pub fn issuer_str(&self) -> &str {
        self.issuer.as_str().trim_end_matches('/')
    }

    /// Human-readable summary used in mismatch errors
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}: issuer={} audience={}",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.issuer_str(),
            self.audience
        )
    }
}

/// One custom role group; satisfied when any member matches a raw role
#[derive(Debug, Clone, Deserialize)]
pub struct CustomRoleGroup {
    /// Internal role name this group maps to
    pub name: String,
    /// Raw role strings that satisfy the group
    pub members: Vec<String>,
}

/// Role-mapping policy.
///
/// Precedence is fixed: admin > user > guest > custom groups in
/// insertion order > default role.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoleMappingConfig {
    pub admin_roles: Vec<String>,
    pub user_roles: Vec<String>,
    pub guest_roles: Vec<String>,
    pub custom_groups: Vec<CustomRoleGroup>,
    /// Role assigned when the raw role list is empty
    pub default_role: String,
    /// When set, raw roles that match no group yield the failure role
    /// instead of the default role
    pub reject_unmapped: bool,
    /// Permission strings granted per internal role
    pub permissions: HashMap<String, Vec<String>>,
}

impl Default for RoleMappingConfig {
    fn default() -> Self {
        Self {
            admin_roles: vec![ROLE_ADMIN.to_string()],
            user_roles: vec![ROLE_USER.to_string()],
            guest_roles: vec![ROLE_GUEST.to_string()],
            custom_groups: Vec::new(),
            default_role: ROLE_GUEST.to_string(),
            reject_unmapped: false,
            permissions: HashMap::new(),
        }
    }
}

impl RoleMappingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_role == ROLE_MAPPING_FAILED {
            return Err(AuthError::Config(
                "default_role must not be the failure role".to_string(),
            ));
        }

        if self
            .permissions
            .get(ROLE_MAPPING_FAILED)
            .is_some_and(|perms| !perms.is_empty())
        {
            return Err(AuthError::Config(format!(
                "permissions must not grant anything to {ROLE_MAPPING_FAILED}"
            )));
        }

        Ok(())
    }
}

/// Delegated token-exchange wiring.
///
/// When configured, the authenticator exchanges the requestor token for
/// a delegation token before role resolution and derives roles from the
/// delegation token's claims, not the requestor's.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Name of the IDP entry the delegation token validates against
    pub idp_name: String,
    /// Claim that must be present in the delegation token
    /// (e.g. a legacy identity a downstream system needs)
    #[serde(default)]
    pub required_claim: Option<ClaimPath>,
    /// Roles claim path in the delegation token (defaults to `roles`)
    #[serde(default)]
    pub roles_claim: Option<ClaimPath>,
}

/// Complete authentication configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Trusted IDP entries, scanned in order during selection
    pub idps: Vec<IdpConfig>,
    /// Role-mapping policy
    pub roles: RoleMappingConfig,
    /// Optional delegated token exchange
    pub exchange: Option<ExchangeConfig>,
    /// Scopes advertised by discovery metadata; never derived from
    /// live sessions
    pub advertised_scopes: Vec<String>,
}

impl AuthConfig {
    /// Parse from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AuthError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a TOML file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.idps.is_empty() {
            return Err(AuthError::Config(
                "at least one trusted IDP is required".to_string(),
            ));
        }

        for idp in &self.idps {
            if idp.algorithms.is_empty() {
                return Err(AuthError::Config(format!(
                    "IDP {} has an empty algorithm allow-list",
                    idp.describe()
                )));
            }
            if idp.mappings.user_id.is_empty() {
                return Err(AuthError::Config(format!(
                    "IDP {} has an empty user-id claim path",
                    idp.describe()
                )));
            }
        }

        self.roles.validate()?;

        if let Some(exchange) = &self.exchange
            && !self
                .idps
                .iter()
                .any(|idp| idp.name.as_deref() == Some(exchange.idp_name.as_str()))
        {
            return Err(AuthError::Config(format!(
                "exchange.idp_name {:?} does not name a configured IDP",
                exchange.idp_name
            )));
        }

        Ok(())
    }
}
