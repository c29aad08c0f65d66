//! Session construction and schema migration
//!
//! A session is built once per authentication attempt and never mutated
//! afterwards; operations that would change it return a new session.
//! Callers may persist sessions; `migrate` upgrades records written by
//! older builds so a rolling deployment does not crash on read.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::claims::ClaimSet;
use crate::config::RoleMappingConfig;
use crate::constants::{ROLE_MAPPING_FAILED, SESSION_SCHEMA_VERSION};
use crate::error::{AuthError, Result};
use crate::roles::RoleResolution;

/// Delegation material attached after a token exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delegation {
    /// The exchanged token
    pub token: String,
    /// Its decoded claims, kept apart from the requestor's claims bag
    pub claims: Value,
}

/// Immutable per-request session.
///
/// Invariant: `rejected == true` iff `role == ROLE_MAPPING_FAILED`, and
/// a session with the failure role never holds permissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Record schema version, for migration on read
    pub schema_version: u32,
    /// Unique per authentication attempt; used for audit correlation
    pub session_id: String,
    pub user_id: String,
    pub username: String,
    /// Legacy identifier some delegation targets require
    #[serde(default)]
    pub legacy_username: Option<String>,
    /// Primary internal role
    pub role: String,
    #[serde(default)]
    pub secondary_roles: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Permissions derived from the primary role
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Requestor bearer token, retained for later delegation
    pub access_token: String,
    /// Requestor token payload
    pub claims: Value,
    /// Delegation token and claims, when an exchange has happened
    #[serde(default)]
    pub delegation: Option<Delegation>,
    /// True when role mapping failed; consumers must check this in
    /// addition to the role field
    pub rejected: bool,
}

impl Session {
    /// New session with delegation material attached.
    ///
    /// The identity fields (including the session id) are unchanged so
    /// audit correlation survives the exchange.
    #[must_use]
    pub fn with_delegation(&self, token: impl Into<String>, claims: Value) -> Self {
        let mut next = self.clone();
        next.delegation = Some(Delegation {
            token: token.into(),
            claims,
        });
        next
    }
}

/// Pure session construction from validated claims and a role result
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    permissions_by_role: HashMap<String, Vec<String>>,
}

impl SessionBuilder {
    #[must_use]
    pub const fn new(permissions_by_role: HashMap<String, Vec<String>>) -> Self {
        Self {
            permissions_by_role,
        }
    }

    #[must_use]
    pub fn from_role_config(config: &RoleMappingConfig) -> Self {
        Self::new(config.permissions.clone())
    }

    /// Build a session. No I/O; a fresh session id per call.
    ///
    /// # Panics
    ///
    /// Panics if the permission table grants anything to the failure
    /// role. That is a configuration bug that must abort loudly rather
    /// than silently grant access; `RoleMappingConfig::validate`
    /// rejects it at load time.
    #[must_use]
    pub fn build(
        &self,
        claims: &ClaimSet,
        roles: &RoleResolution,
        access_token: &str,
        delegation: Option<Delegation>,
    ) -> Session {
        let username = claims
            .display_name
            .clone()
            .or_else(|| claims.username.clone())
            .unwrap_or_else(|| claims.user_id.clone());

        let rejected = roles.primary == ROLE_MAPPING_FAILED;

        let permissions = self
            .permissions_by_role
            .get(&roles.primary)
            .cloned()
            .unwrap_or_default();
        assert!(
            !(rejected && !permissions.is_empty()),
            "permission table grants privileges to {ROLE_MAPPING_FAILED}"
        );

        Session {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: claims.user_id.clone(),
            username,
            legacy_username: claims.legacy_username.clone(),
            role: roles.primary.clone(),
            secondary_roles: roles.secondary.clone(),
            scopes: claims.scopes.clone(),
            permissions,
            access_token: access_token.to_string(),
            claims: claims.raw.clone(),
            delegation,
            rejected,
        }
    }
}

/// Upgrade a possibly older-schema session record to the current
/// schema.
///
/// Steps run in order: v0 records gain the `rejected` field, v1 records
/// drop the retired `realm` field and gain `permissions`. Migrating a
/// current-schema record is a no-op.
pub fn migrate(raw: Value) -> Result<Session> {
    let mut record = raw;
    let obj = record
        .as_object_mut()
        .ok_or_else(|| AuthError::SessionInvalid("not a JSON object".to_string()))?;

    // Compared in u64 so an oversized stored version cannot wrap into
    // a valid one before the refusal below.
    let version = obj
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    if version > u64::from(SESSION_SCHEMA_VERSION) {
        return Err(AuthError::SessionInvalid(format!(
            "schema version {version} is newer than supported {SESSION_SCHEMA_VERSION}"
        )));
    }

    if version < 1 {
        let rejected = obj.get("role").and_then(Value::as_str) == Some(ROLE_MAPPING_FAILED);
        obj.insert("rejected".to_string(), Value::Bool(rejected));
    }

    if version < 2 {
        obj.remove("realm");
        obj.entry("permissions".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
    }

    obj.insert(
        "schema_version".to_string(),
        Value::from(SESSION_SCHEMA_VERSION),
    );

    let mut session: Session = serde_json::from_value(record)
        .map_err(|e| AuthError::SessionInvalid(e.to_string()))?;

    // The role field is authoritative for the rejection invariant.
    session.rejected = session.role == ROLE_MAPPING_FAILED;
    if session.rejected {
        session.permissions.clear();
    }

    Ok(session)
}
