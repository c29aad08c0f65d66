//! Claim paths and validated claim sets
//!
//! IDP token layouts differ (Keycloak nests roles under
//! `realm_access.roles`, others use a flat `roles` claim), so claim
//! locations are configured as dotted paths and resolved against the raw
//! payload tree. A path that is absent is a different outcome from a path
//! that resolves to the wrong JSON type; extraction code needs to tell
//! those apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a typed claim-path lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// No value at this path
    NotFound,
    /// A value exists but has the wrong JSON type
    WrongType { expected: &'static str },
}

/// Parsed dotted claim path, e.g. `"realm_access.roles"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPath(Vec<String>);

impl ClaimPath {
    /// Parse a dotted path. Empty segments are dropped.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Walk the payload tree segment by segment
    #[must_use]
    pub fn locate<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.0 {
            current = current.as_object()?.get(segment)?;
        }
        if self.0.is_empty() { None } else { Some(current) }
    }

    /// Resolve the path to a string value
    pub fn string_at(&self, root: &Value) -> std::result::Result<String, PathError> {
        match self.locate(root) {
            None => Err(PathError::NotFound),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(PathError::WrongType { expected: "string" }),
        }
    }

    /// Resolve the path to a list of strings.
    ///
    /// A single string counts as a one-element list; non-string array
    /// elements are skipped.
    pub fn string_list_at(&self, root: &Value) -> std::result::Result<Vec<String>, PathError> {
        match self.locate(root) {
            None => Err(PathError::NotFound),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()),
            Some(_) => Err(PathError::WrongType {
                expected: "string or array of strings",
            }),
        }
    }

    /// Resolve the path to a scope list.
    ///
    /// Accepts either the OAuth space-delimited `scope` string or an
    /// already-split list form.
    pub fn scopes_at(&self, root: &Value) -> std::result::Result<Vec<String>, PathError> {
        match self.locate(root) {
            None => Err(PathError::NotFound),
            Some(Value::String(s)) => Ok(split_scopes(s)),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()),
            Some(_) => Err(PathError::WrongType {
                expected: "string or array of strings",
            }),
        }
    }
}

impl std::fmt::Display for ClaimPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl<'de> Deserialize<'de> for ClaimPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Split a space-delimited scope string
#[must_use]
pub fn split_scopes(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(String::from).collect()
}

/// A value that may be a single string or a list (JWT `aud` form)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(s) => s == value,
            Self::Many(v) => v.iter().any(|s| s == value),
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

/// Claims extracted from a validated token.
///
/// Produced per request by the validator. `user_id` is always present;
/// validation fails without it. The raw payload is retained so downstream
/// consumers can read claims the mappings do not cover.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimSet {
    /// Stable user identifier (from the configured user-id path)
    pub user_id: String,
    /// Preferred display name, if mapped and present
    pub display_name: Option<String>,
    /// Username claim, if mapped and present
    pub username: Option<String>,
    /// Legacy identifier some delegation targets require
    pub legacy_username: Option<String>,
    /// Raw role strings, unmapped
    pub roles: Vec<String>,
    /// Normalized scopes
    pub scopes: Vec<String>,
    /// Full decoded payload
    pub raw: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_single_segment() {
        let path = ClaimPath::parse("sub");
        let root = json!({"sub": "user123"});
        assert_eq!(path.string_at(&root).unwrap(), "user123");
    }

    #[test]
    fn test_parse_nested_path() {
        let path = ClaimPath::parse("realm_access.roles");
        let root = json!({"realm_access": {"roles": ["admin", "user"]}});
        assert_eq!(path.string_list_at(&root).unwrap(), vec!["admin", "user"]);
    }

    #[test]
    fn test_locate_missing_is_not_found() {
        let path = ClaimPath::parse("realm_access.roles");
        let root = json!({"sub": "user123"});
        assert_eq!(path.string_at(&root), Err(PathError::NotFound));
    }

    #[test]
    fn test_wrong_type_is_distinct_from_missing() {
        let path = ClaimPath::parse("roles");
        let root = json!({"roles": 42});
        assert_eq!(
            path.string_list_at(&root),
            Err(PathError::WrongType {
                expected: "string or array of strings"
            })
        );
    }

    #[test]
    fn test_string_at_rejects_array() {
        let path = ClaimPath::parse("sub");
        let root = json!({"sub": ["a", "b"]});
        assert!(matches!(
            path.string_at(&root),
            Err(PathError::WrongType { .. })
        ));
    }

    #[test]
    fn test_string_list_accepts_single_string() {
        let path = ClaimPath::parse("roles");
        let root = json!({"roles": "admin"});
        assert_eq!(path.string_list_at(&root).unwrap(), vec!["admin"]);
    }

    #[test]
    fn test_string_list_skips_non_string_elements() {
        let path = ClaimPath::parse("roles");
        let root = json!({"roles": ["admin", 7, null, "user"]});
        assert_eq!(path.string_list_at(&root).unwrap(), vec!["admin", "user"]);
    }

    #[test]
    fn test_scopes_space_delimited() {
        let path = ClaimPath::parse("scope");
        let root = json!({"scope": "openid profile tools:invoke"});
        assert_eq!(
            path.scopes_at(&root).unwrap(),
            vec!["openid", "profile", "tools:invoke"]
        );
    }

    #[test]
    fn test_scopes_list_form() {
        let path = ClaimPath::parse("scp");
        let root = json!({"scp": ["openid", "profile"]});
        assert_eq!(path.scopes_at(&root).unwrap(), vec!["openid", "profile"]);
    }

    #[test]
    fn test_empty_path_locates_nothing() {
        let path = ClaimPath::parse("");
        assert!(path.is_empty());
        assert!(path.locate(&json!({"a": 1})).is_none());
    }

    #[test]
    fn test_path_through_non_object_fails() {
        let path = ClaimPath::parse("a.b");
        let root = json!({"a": "not-an-object"});
        assert_eq!(path.string_at(&root), Err(PathError::NotFound));
    }

    #[test]
    fn test_display_round_trip() {
        let path = ClaimPath::parse("realm_access.roles");
        assert_eq!(path.to_string(), "realm_access.roles");
    }

    #[test]
    fn test_one_or_many() {
        let one = OneOrMany::One("api".to_string());
        assert!(one.contains("api"));
        assert!(!one.contains("web"));

        let many = OneOrMany::Many(vec!["api".to_string(), "web".to_string()]);
        assert!(many.contains("web"));
        assert_eq!(many.to_vec(), vec!["api", "web"]);
    }

    #[test]
    fn test_claim_path_deserialize() {
        #[derive(Deserialize)]
        struct Holder {
            path: ClaimPath,
        }
        let holder: Holder = toml::from_str(r#"path = "realm_access.roles""#).unwrap();
        assert_eq!(holder.path, ClaimPath::parse("realm_access.roles"));
    }
}
