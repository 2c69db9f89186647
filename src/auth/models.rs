//! Authentication Models
//! Mission: Define identity, authority and token data structures

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Known authorities for RBAC. Wire names are the stored role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Authority {
    #[serde(rename = "ROLE_USER")]
    User,
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
}

impl Authority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Authority::User => "ROLE_USER",
            Authority::Admin => "ROLE_ADMIN",
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Authority {
    type Err = UnknownAuthority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROLE_USER" => Ok(Authority::User),
            "ROLE_ADMIN" => Ok(Authority::Admin),
            other => Err(UnknownAuthority(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown authority: {0}")]
pub struct UnknownAuthority(pub String);

/// Login request body. Lives only for the duration of one login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Account record as the user store hands it out.
#[derive(Debug, Clone)]
pub struct StoredIdentity {
    pub username: String,
    pub password_hash: String, // bcrypt hash - never serialize
    pub authorities: BTreeSet<Authority>,
}

/// Resolved, request-scoped identity.
///
/// Built either from a verified stored record or from validated token claims,
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    username: String,
    authorities: BTreeSet<Authority>,
    is_admin: bool,
}

impl Identity {
    /// Identity whose admin flag follows from its authorities.
    pub fn new(username: impl Into<String>, authorities: BTreeSet<Authority>) -> Self {
        let is_admin = authorities.contains(&Authority::Admin);
        Self {
            username: username.into(),
            authorities,
            is_admin,
        }
    }

    /// Identity rebuilt from token claims; the admin flag is taken as signed.
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            username: claims.sub,
            authorities: claims.authorities.into_iter().collect(),
            is_admin: claims.is_admin,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn authorities(&self) -> &BTreeSet<Authority> {
        &self.authorities
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn has_any(&self, accepted: &[Authority]) -> bool {
        accepted.iter().any(|a| self.authorities.contains(a))
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub authorities: Vec<Authority>,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Login response body
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_serialization() {
        let json = serde_json::to_string(&Authority::Admin).unwrap();
        assert_eq!(json, r#""ROLE_ADMIN""#);

        let user: Authority = serde_json::from_str(r#""ROLE_USER""#).unwrap();
        assert_eq!(user, Authority::User);

        assert!(serde_json::from_str::<Authority>(r#""ROLE_ROOT""#).is_err());
    }

    #[test]
    fn test_authority_string_conversion() {
        assert_eq!(Authority::User.as_str(), "ROLE_USER");
        assert_eq!("ROLE_ADMIN".parse::<Authority>(), Ok(Authority::Admin));
        assert_eq!(
            "admin".parse::<Authority>(),
            Err(UnknownAuthority("admin".to_string()))
        );
    }

    #[test]
    fn test_identity_admin_flag_follows_authorities() {
        let user = Identity::new("alice", BTreeSet::from([Authority::User]));
        assert!(!user.is_admin());

        let admin = Identity::new("root", BTreeSet::from([Authority::User, Authority::Admin]));
        assert!(admin.is_admin());
        assert!(admin.has_any(&[Authority::Admin]));
        assert!(!user.has_any(&[Authority::Admin]));
    }

    #[test]
    fn test_identity_from_claims() {
        let claims = Claims {
            sub: "bob".to_string(),
            authorities: vec![Authority::Admin, Authority::User],
            is_admin: true,
            iat: 0,
            exp: 3600,
        };

        let identity = Identity::from_claims(claims);
        assert_eq!(identity.username(), "bob");
        assert_eq!(identity.authorities().len(), 2);
        assert!(identity.is_admin());
    }

    #[test]
    fn test_claims_wire_names() {
        let claims = Claims {
            sub: "bob".to_string(),
            authorities: vec![Authority::User],
            is_admin: false,
            iat: 10,
            exp: 3610,
        };

        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["sub"], "bob");
        assert_eq!(value["authorities"], serde_json::json!(["ROLE_USER"]));
        assert_eq!(value["isAdmin"], false);
        assert_eq!(value["exp"], 3610);
    }
}
