//! Role resolution: raw IDP role strings to one internal primary role
//!
//! This is the one "catch everything" boundary in the pipeline. A
//! role-mapping misconfiguration must degrade to a rejected session,
//! not crash authentication or fall through to a default grant, so
//! `resolve` never returns an error: every input shape produces a
//! [`RoleResolution`], with the failure role standing in when mapping
//! goes wrong.

use serde_json::Value;

use crate::config::RoleMappingConfig;
use crate::constants::{ROLE_ADMIN, ROLE_GUEST, ROLE_MAPPING_FAILED, ROLE_USER};

/// Outcome of role resolution.
///
/// Invariant: `failed == true` iff `primary == ROLE_MAPPING_FAILED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleResolution {
    /// Exactly one internal primary role
    pub primary: String,
    /// Custom groups satisfied besides the primary, insertion order
    pub secondary: Vec<String>,
    /// True when mapping failed and the failure role was assigned
    pub failed: bool,
    /// Human-readable reason when `failed`
    pub reason: Option<String>,
}

impl RoleResolution {
    fn success(primary: impl Into<String>, secondary: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary,
            failed: false,
            reason: None,
        }
    }

    fn failure(reason: impl Into<String>) -> Self {
        Self {
            primary: ROLE_MAPPING_FAILED.to_string(),
            secondary: Vec::new(),
            failed: true,
            reason: Some(reason.into()),
        }
    }
}

/// Maps raw role strings to internal roles under a fixed precedence
#[derive(Debug, Clone)]
pub struct RoleResolver {
    config: RoleMappingConfig,
}

impl RoleResolver {
    #[must_use]
    pub const fn new(config: RoleMappingConfig) -> Self {
        Self { config }
    }

    /// Resolve from a raw claim value of any shape.
    ///
    /// Accepts a string, an array, null, or anything else an IDP might
    /// put in a roles claim; unexpected shapes become a failed result,
    /// never an error.
    #[must_use]
    pub fn resolve_value(&self, raw: &Value) -> RoleResolution {
        match raw {
            Value::Null => self.resolve(&[]),
            Value::String(s) => self.resolve(std::slice::from_ref(s)),
            Value::Array(items) => {
                let roles: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
                self.resolve(&roles)
            }
            other => RoleResolution::failure(format!(
                "roles claim has unexpected type: {}",
                json_type_name(other)
            )),
        }
    }

    /// Resolve from an already-normalized role list
    #[must_use]
    pub fn resolve(&self, raw: &[String]) -> RoleResolution {
        let roles: Vec<&str> = raw
            .iter()
            .map(String::as_str)
            .filter(|r| !r.trim().is_empty())
            .collect();

        // Absence of roles is not a rejection; the default role applies
        // even under reject_unmapped.
        if roles.is_empty() {
            return RoleResolution::success(self.config.default_role.clone(), Vec::new());
        }

        let matches_group = |group: &[String]| group.iter().any(|g| roles.contains(&g.as_str()));

        let primary = if matches_group(&self.config.admin_roles) {
            Some(ROLE_ADMIN.to_string())
        } else if matches_group(&self.config.user_roles) {
            Some(ROLE_USER.to_string())
        } else if matches_group(&self.config.guest_roles) {
            Some(ROLE_GUEST.to_string())
        } else {
            self.config
                .custom_groups
                .iter()
                .find(|group| matches_group(&group.members))
                .map(|group| group.name.clone())
        };

        let Some(primary) = primary else {
            if self.config.reject_unmapped {
                return RoleResolution::failure(format!(
                    "no configured group matches roles {roles:?}"
                ));
            }
            return RoleResolution::success(self.config.default_role.clone(), Vec::new());
        };

        let secondary: Vec<String> = self
            .config
            .custom_groups
            .iter()
            .filter(|group| group.name != primary && matches_group(&group.members))
            .map(|group| group.name.clone())
            .collect();

        RoleResolution::success(primary, secondary)
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
