//! Authentication orchestration
//!
//! One entry point chains the pipeline stages: validate the requestor
//! token, optionally exchange it for a delegation token, resolve roles,
//! build the session, and emit exactly one audit entry per attempt.
//! Validation failures abort; role-mapping failures produce a rejected
//! session with the attempt still fully audited.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::audit::{AuditEntry, AuditSink, NoopAuditSink};
use crate::claims::{ClaimPath, ClaimSet};
use crate::config::ExchangeConfig;
use crate::constants::{AUTH_AUDIT_ACTION, AUTH_AUDIT_SOURCE};
use crate::error::{AuthError, Result};
use crate::roles::{RoleResolution, RoleResolver};
use crate::session::{Delegation, Session, SessionBuilder};
use crate::validator::{ClaimValidator, ValidateOptions};

/// Exchanges a requestor token for a delegation token.
///
/// The returned token is validated against the exchange IDP entry like
/// any other bearer token; implementations only perform the exchange
/// call itself.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, token: &str, idp_name: &str) -> Result<String>;
}

/// Result of a completed (non-aborted) authentication attempt.
///
/// `rejected` mirrors the session's flag; callers that only gate on
/// the outcome can check it without inspecting the session.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub session: Session,
    pub rejected: bool,
    /// Rejection reason, when role mapping failed
    pub reason: Option<String>,
    /// The audit entry emitted for this attempt
    pub audit: AuditEntry,
}

/// Chains validator, exchanger, resolver, and builder behind one call
pub struct Authenticator {
    validator: Arc<ClaimValidator>,
    resolver: RoleResolver,
    builder: SessionBuilder,
    sink: Arc<dyn AuditSink>,
    exchange: Option<(Arc<dyn TokenExchanger>, ExchangeConfig)>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("validator", &self.validator)
            .field("exchange", &self.exchange.as_ref().map(|(_, cfg)| cfg))
            .finish()
    }
}

impl Authenticator {
    #[must_use]
    pub fn new(
        validator: Arc<ClaimValidator>,
        resolver: RoleResolver,
        builder: SessionBuilder,
    ) -> Self {
        Self {
            validator,
            resolver,
            builder,
            sink: Arc::new(NoopAuditSink),
            exchange: None,
        }
    }

    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Enable delegated token exchange.
    ///
    /// `config.idp_name` must name a configured IDP entry; the config
    /// loader enforces that.
    #[must_use]
    pub fn with_exchanger(
        mut self,
        exchanger: Arc<dyn TokenExchanger>,
        config: ExchangeConfig,
    ) -> Self {
        self.exchange = Some((exchanger, config));
        self
    }

    /// Authenticate a bearer token end to end.
    ///
    /// Returns `Ok` for every completed attempt, including rejected
    /// sessions; `Err` only for aborts (malformed/expired/untrusted
    /// tokens, failed exchange). Either way exactly one audit entry is
    /// emitted.
    pub async fn authenticate(
        &self,
        token: &str,
        idp_hint: Option<&str>,
    ) -> Result<AuthOutcome> {
        let opts = ValidateOptions {
            idp_name: idp_hint,
            ..Default::default()
        };

        let claims = match self.validator.validate(token, &opts).await {
            Ok(claims) => claims,
            Err(err) => {
                self.audit_abort(&err);
                return Err(err);
            }
        };

        let (roles, delegation) = match self.resolve_with_exchange(token, &claims).await {
            Ok(pair) => pair,
            Err(err) => {
                self.audit_abort(&err);
                return Err(err);
            }
        };

        // The exchange's required claim is the legacy identity the
        // delegation target consumes; it supersedes whatever the
        // requestor token carried.
        let claims = match self.exchange_legacy_username(delegation.as_ref()) {
            Some(legacy) => ClaimSet {
                legacy_username: Some(legacy),
                ..claims
            },
            None => claims,
        };

        let session = self
            .builder
            .build(&claims, &roles, token, delegation);

        let audit = self.audit_outcome(&session, &roles);

        tracing::info!(
            user_id = %session.user_id,
            role = %session.role,
            rejected = session.rejected,
            session_id = %session.session_id,
            "authentication complete"
        );

        Ok(AuthOutcome {
            rejected: session.rejected,
            reason: roles.reason,
            session,
            audit,
        })
    }

    /// Exchange when configured, then resolve roles from whichever
    /// token is authoritative: the delegation token's claims when an
    /// exchange happened, the requestor's otherwise.
    async fn resolve_with_exchange(
        &self,
        token: &str,
        claims: &ClaimSet,
    ) -> Result<(RoleResolution, Option<Delegation>)> {
        let Some((exchanger, config)) = &self.exchange else {
            return Ok((self.resolver.resolve(&claims.roles), None));
        };

        let delegation_token = exchanger.exchange(token, &config.idp_name).await?;

        let opts = ValidateOptions {
            idp_name: Some(config.idp_name.as_str()),
            ..Default::default()
        };
        let delegation_claims = self
            .validator
            .validate(&delegation_token, &opts)
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;

        if let Some(required) = &config.required_claim
            && required.locate(&delegation_claims.raw).is_none()
        {
            return Err(AuthError::MissingExchangeClaim(required.to_string()));
        }

        let default_roles_path = ClaimPath::parse("roles");
        let roles_path = config.roles_claim.as_ref().unwrap_or(&default_roles_path);
        let roles = match roles_path.locate(&delegation_claims.raw) {
            Some(value) => self.resolver.resolve_value(value),
            None => self.resolver.resolve(&[]),
        };

        let delegation = Delegation {
            token: delegation_token,
            claims: delegation_claims.raw,
        };

        Ok((roles, Some(delegation)))
    }

    /// Abort entries never carry a user id; an aborted attempt has no
    /// authenticated identity to attribute, whichever stage failed.
    fn audit_abort(&self, err: &AuthError) {
        let entry = AuditEntry::new(AUTH_AUDIT_SOURCE, AUTH_AUDIT_ACTION, false)
            .with_reason(err.to_string())
            .with_error_code(err.code());
        self.record(entry);
    }

    fn exchange_legacy_username(&self, delegation: Option<&Delegation>) -> Option<String> {
        let (_, config) = self.exchange.as_ref()?;
        let path = config.required_claim.as_ref()?;
        path.string_at(&delegation?.claims).ok()
    }

    fn audit_outcome(&self, session: &Session, roles: &RoleResolution) -> AuditEntry {
        let mut entry = AuditEntry::new(AUTH_AUDIT_SOURCE, AUTH_AUDIT_ACTION, !session.rejected)
            .with_user_id(&session.user_id)
            .with_metadata(json!({
                "session_id": session.session_id,
                "role": session.role,
                "delegated": session.delegation.is_some(),
            }));
        if let Some(reason) = &roles.reason {
            entry = entry.with_reason(reason);
        }
        self.record(entry.clone());
        entry
    }

    /// A sink failure must not fail authentication; it is logged and
    /// the attempt proceeds.
    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.sink.record(entry) {
            tracing::error!(error = %e, "audit sink rejected entry");
        }
    }
}
