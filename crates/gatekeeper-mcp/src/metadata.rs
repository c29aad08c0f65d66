//! Protected-resource metadata advertisement
//!
//! Echoes the configured trust anchors so clients can discover which
//! IDPs and algorithms the server accepts. Scopes come exclusively
//! from configuration; deriving them from live sessions would leak
//! which scopes real users hold.

use serde::Serialize;

use crate::config::{AuthConfig, algorithm_name};

/// One advertised authorization server entry
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthorizationServer {
    pub issuer: String,
    pub jwks_uri: String,
    pub audience: String,
    pub algorithms: Vec<&'static str>,
}

/// Discovery document for this protected resource
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResourceMetadata {
    pub authorization_servers: Vec<AuthorizationServer>,
    pub scopes_supported: Vec<String>,
}

impl ResourceMetadata {
    /// Build from configuration, echoing issuer and algorithm values
    /// verbatim
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let authorization_servers = config
            .idps
            .iter()
            .map(|idp| AuthorizationServer {
                issuer: idp.issuer.as_str().to_string(),
                jwks_uri: idp.jwks_uri.as_str().to_string(),
                audience: idp.audience.clone(),
                algorithms: idp.algorithms.iter().copied().map(algorithm_name).collect(),
            })
            .collect();

        Self {
            authorization_servers,
            scopes_supported: config.advertised_scopes.clone(),
        }
    }
}
