//! Authentication error taxonomy
//!
//! Every abort-level failure in the pipeline maps to one variant with a
//! stable machine-readable `code()` and an HTTP-status-like `status()`
//! hint. Role-mapping failure is deliberately absent: it is a soft
//! failure surfaced through [`crate::roles::RoleResolution`], never an
//! error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    NotAuthenticated,

    #[error("validator not initialized; call initialize() first")]
    NotInitialized,

    #[error("malformed token: expected three dot-separated segments")]
    MalformedToken,

    #[error("untrusted issuer: no trusted IDP matches issuer {issuer:?} and audience {audience:?}")]
    UntrustedIssuer {
        issuer: Option<String>,
        audience: Option<String>,
    },

    #[error("IDP {name:?} does not match token issuer/audience; candidates: {candidates}")]
    IdpMismatch { name: String, candidates: String },

    #[error("algorithm {0} not in IDP allow-list")]
    AlgorithmNotAllowed(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("token expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,

    #[error("token too old: issued {age_secs}s ago, maximum {max_secs}s")]
    TokenTooOld { age_secs: i64, max_secs: u64 },

    #[error("missing required nbf claim")]
    MissingNotBefore,

    #[error("authorized party {azp:?} does not match audience {audience:?}")]
    AuthorizedPartyMismatch { azp: String, audience: String },

    #[error("missing required claim: {0}")]
    MissingClaim(String),

    #[error("invalid claims: {0}")]
    ClaimsInvalid(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("no matching key for algorithm")]
    NoMatchingKey,

    #[error("JWKS fetch failed: {0}")]
    JwksFetch(#[from] reqwest::Error),

    #[error("JWKS parse failed: {0}")]
    JwksParse(String),

    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("delegation token missing required claim: {0}")]
    MissingExchangeClaim(String),

    #[error("insufficient role: required {0}")]
    InsufficientRole(String),

    #[error("invalid session record: {0}")]
    SessionInvalid(String),

    #[error("audit entry has empty source tag")]
    AuditSourceMissing,

    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable machine-readable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::NotInitialized => "not_initialized",
            Self::MalformedToken => "malformed_token",
            Self::UntrustedIssuer { .. } => "untrusted_issuer",
            Self::IdpMismatch { .. } => "idp_mismatch",
            Self::AlgorithmNotAllowed(_) => "algorithm_not_allowed",
            Self::InvalidToken => "invalid_token",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::TokenTooOld { .. } => "token_too_old",
            Self::MissingNotBefore => "missing_nbf",
            Self::AuthorizedPartyMismatch { .. } => "authorized_party_mismatch",
            Self::MissingClaim(_) => "missing_claim",
            Self::ClaimsInvalid(_) => "claims_invalid",
            Self::KeyNotFound(_) => "key_not_found",
            Self::NoMatchingKey => "no_matching_key",
            Self::JwksFetch(_) => "jwks_fetch_failed",
            Self::JwksParse(_) => "jwks_parse_failed",
            Self::ExchangeFailed(_) => "exchange_failed",
            Self::MissingExchangeClaim(_) => "missing_exchange_claim",
            Self::SessionInvalid(_) => "session_invalid",
            Self::InsufficientRole(_) => "insufficient_role",
            Self::AuditSourceMissing => "audit_source_missing",
            Self::Config(_) => "config_error",
        }
    }

    /// HTTP-status-like severity hint.
    ///
    /// 401 for unauthenticated (format/signature/expiry problems),
    /// 403 for authenticated-but-forbidden, 500 for misconfiguration.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::NotAuthenticated
            | Self::MalformedToken
            | Self::UntrustedIssuer { .. }
            | Self::IdpMismatch { .. }
            | Self::AlgorithmNotAllowed(_)
            | Self::InvalidToken
            | Self::InvalidSignature
            | Self::InvalidIssuer
            | Self::InvalidAudience
            | Self::TokenExpired
            | Self::TokenNotYetValid
            | Self::TokenTooOld { .. }
            | Self::MissingNotBefore
            | Self::MissingClaim(_)
            | Self::ClaimsInvalid(_)
            | Self::KeyNotFound(_)
            | Self::NoMatchingKey
            | Self::ExchangeFailed(_)
            | Self::MissingExchangeClaim(_) => 401,

            Self::AuthorizedPartyMismatch { .. } | Self::InsufficientRole(_) => 403,

            Self::NotInitialized
            | Self::SessionInvalid(_)
            | Self::JwksFetch(_)
            | Self::JwksParse(_)
            | Self::AuditSourceMissing
            | Self::Config(_) => 500,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::ImmatureSignature => Self::TokenNotYetValid,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::InvalidToken,
        }
    }
}

/// Convert auth failures to MCP `ErrorData` for tool responses
impl From<AuthError> for rmcp::ErrorData {
    fn from(err: AuthError) -> Self {
        match err.status() {
            500 => Self::internal_error(err.to_string(), None),
            _ => Self::invalid_params(err.to_string(), None),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
