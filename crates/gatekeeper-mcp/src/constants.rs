//! Constants shared across the authentication core

/// Primary role assigned when role mapping fails.
///
/// A session carrying this role is always rejected and never holds
/// permissions. The double underscores keep it out of any realistic
/// IDP role namespace.
pub const ROLE_MAPPING_FAILED: &str = "__mapping_failed__";

/// Built-in primary role: full administrative access
pub const ROLE_ADMIN: &str = "admin";

/// Built-in primary role: standard user access
pub const ROLE_USER: &str = "user";

/// Built-in primary role: minimal read-only access
pub const ROLE_GUEST: &str = "guest";

/// Current session schema version (see `session::migrate`)
pub const SESSION_SCHEMA_VERSION: u32 = 2;

/// Default capacity of the in-memory audit buffer
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Source tag stamped on every audit entry the authenticator emits
pub const AUTH_AUDIT_SOURCE: &str = "gatekeeper.authenticator";

/// Action name recorded for authentication attempts
pub const AUTH_AUDIT_ACTION: &str = "authenticate";
