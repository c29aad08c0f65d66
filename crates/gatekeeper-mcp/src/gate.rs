//! Authorization checks over a built session
//!
//! Soft checks answer yes/no for conditional behavior; hard checks
//! return the error taxonomy for request gating. A rejected session
//! fails every check regardless of what its role field says, so a bug
//! that leaves a role on a rejected session cannot grant access.

use crate::constants::ROLE_MAPPING_FAILED;
use crate::error::{AuthError, Result};
use crate::session::Session;

/// True when the session may be used for authorization at all
#[must_use]
pub fn is_authenticated(session: &Session) -> bool {
    !session.rejected && session.role != ROLE_MAPPING_FAILED
}

/// True when the session holds `role` as primary or secondary
#[must_use]
pub fn has_role(session: &Session, role: &str) -> bool {
    is_authenticated(session)
        && (session.role == role || session.secondary_roles.iter().any(|r| r == role))
}

#[must_use]
pub fn has_any_role(session: &Session, roles: &[&str]) -> bool {
    roles.iter().any(|role| has_role(session, role))
}

#[must_use]
pub fn has_all_roles(session: &Session, roles: &[&str]) -> bool {
    roles.iter().all(|role| has_role(session, role))
}

/// Errors with [`AuthError::NotAuthenticated`] unless the session is
/// usable
pub fn require_authenticated(session: &Session) -> Result<()> {
    if is_authenticated(session) {
        Ok(())
    } else {
        Err(AuthError::NotAuthenticated)
    }
}

/// Errors unless the session holds `role`.
///
/// An unusable session yields the authentication error, not the role
/// error; the caller learns the weakest failing condition.
pub fn require_role(session: &Session, role: &str) -> Result<()> {
    require_authenticated(session)?;
    if has_role(session, role) {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole(role.to_string()))
    }
}

pub fn require_any_role(session: &Session, roles: &[&str]) -> Result<()> {
    require_authenticated(session)?;
    if has_any_role(session, roles) {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole(roles.join(" or ")))
    }
}
