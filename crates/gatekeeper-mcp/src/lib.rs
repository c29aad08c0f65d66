//! Bearer-token authentication core for MCP tool servers

pub mod audit;
pub mod claims;
pub mod config;
mod constants;
mod error;
pub mod gate;
pub mod jwks;
pub mod metadata;
pub mod orchestrator;
pub mod roles;
pub mod session;
#[cfg(test)]
mod testkeys;
pub mod validator;

pub use audit::{AuditEntry, AuditSink, MemoryAuditSink, NoopAuditSink};
pub use claims::{ClaimPath, ClaimSet, OneOrMany, PathError};
pub use config::{
    AuthConfig, ClaimMappings, CustomRoleGroup, ExchangeConfig, IdpConfig, RoleMappingConfig,
    SecurityPolicy,
};
pub use constants::{
    DEFAULT_AUDIT_CAPACITY, ROLE_ADMIN, ROLE_GUEST, ROLE_MAPPING_FAILED, ROLE_USER,
    SESSION_SCHEMA_VERSION,
};
pub use error::{AuthError, Result};
pub use gate::{
    has_all_roles, has_any_role, has_role, is_authenticated, require_any_role,
    require_authenticated, require_role,
};
pub use jwks::{JwkSet, JwksCache, JwksRefreshTask};
pub use metadata::{AuthorizationServer, ResourceMetadata};
pub use orchestrator::{AuthOutcome, Authenticator, TokenExchanger};
pub use roles::{RoleResolution, RoleResolver};
pub use session::{Delegation, Session, SessionBuilder, migrate};
pub use validator::{ClaimValidator, ValidateOptions};
