//! JWT Token Handler
//! Mission: Issue and validate HS256 bearer tokens

use crate::auth::{
    error::TokenError,
    models::{Claims, Identity},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use tracing::debug;

/// Lifetime of every issued token.
pub const TOKEN_TTL_SECS: i64 = 3600;

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// A freshly signed token plus the timestamps baked into it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// JWT Handler for token operations. Immutable once built.
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl JwtHandler {
    /// Create a handler with the process-wide secret. Secret strength is
    /// checked by the configuration layer before this is called.
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Sign a token for an authenticated identity.
    pub fn issue(&self, identity: &Identity) -> Result<IssuedToken> {
        self.issue_at(identity, Utc::now())
    }

    pub(crate) fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<IssuedToken> {
        let expires = now
            .checked_add_signed(Duration::seconds(self.ttl_secs))
            .context("Invalid timestamp")?;

        let claims = Claims {
            sub: identity.username().to_string(),
            authorities: identity.authorities().iter().copied().collect(),
            is_admin: identity.is_admin(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        debug!(
            username = identity.username(),
            is_admin = claims.is_admin,
            ttl_secs = self.ttl_secs,
            "Issuing JWT"
        );

        let token = encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .context("Failed to sign JWT")?;

        Ok(IssuedToken {
            token,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    /// Verify a compact token and rebuild the identity it carries.
    ///
    /// The signature is checked before expiry, so a correctly signed stale
    /// token reports [`TokenError::Expired`].
    pub fn validate(&self, token: &str) -> Result<Identity, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed);
        }

        let decoded = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| classify(e.kind()))?;

        debug!(username = %decoded.claims.sub, "Validated JWT");

        Ok(Identity::from_claims(decoded.claims))
    }
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::SignatureInvalid,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::Authority;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use std::collections::BTreeSet;

    const SECRET: &[u8] = b"test-secret-key-with-enough-bytes-0123456789";

    fn handler() -> JwtHandler {
        JwtHandler::new(SECRET, TOKEN_TTL_SECS)
    }

    fn admin() -> Identity {
        Identity::new("admin", BTreeSet::from([Authority::User, Authority::Admin]))
    }

    fn decode_segment(segment: &str) -> serde_json::Value {
        let bytes = URL_SAFE_NO_PAD.decode(segment).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_issue_and_validate_round_trip() {
        let handler = handler();
        let identity = admin();

        let issued = handler.issue(&identity).unwrap();
        assert!(!issued.token.is_empty());
        assert_eq!(issued.expires_at - issued.issued_at, TOKEN_TTL_SECS);

        let validated = handler.validate(&issued.token).unwrap();
        assert_eq!(validated, identity);
    }

    #[test]
    fn test_token_layout_and_claims() {
        let issued = handler()
            .issue(&Identity::new("alice", BTreeSet::from([Authority::User])))
            .unwrap();

        let parts: Vec<&str> = issued.token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header = decode_segment(parts[0]);
        assert_eq!(header["alg"], "HS256");

        let claims = decode_segment(parts[1]);
        assert_eq!(claims["sub"], "alice");
        assert_eq!(claims["authorities"], serde_json::json!(["ROLE_USER"]));
        assert_eq!(claims["isAdmin"], false);
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            3600
        );
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let handler = handler();

        assert_eq!(handler.validate(""), Err(TokenError::Malformed));
        assert_eq!(handler.validate("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(handler.validate("a.b"), Err(TokenError::Malformed));
        assert_eq!(handler.validate("a.b.c.d"), Err(TokenError::Malformed));
        assert_eq!(handler.validate("invalid.token.here"), Err(TokenError::Malformed));
    }

    #[test]
    fn test_different_secrets_reject() {
        let other = JwtHandler::new(b"another-secret-key-with-enough-bytes-987654", TOKEN_TTL_SECS);
        let issued = other.issue(&admin()).unwrap();

        assert_eq!(
            handler().validate(&issued.token),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let handler = handler();
        let issued = handler
            .issue(&Identity::new("alice", BTreeSet::from([Authority::User])))
            .unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();

        let mut claims = decode_segment(parts[1]);
        claims["authorities"] = serde_json::json!(["ROLE_USER", "ROLE_ADMIN"]);
        claims["isAdmin"] = serde_json::json!(true);
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());

        let token = format!("{}.{}.{}", parts[0], forged, parts[2]);
        assert_eq!(handler.validate(&token), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_expired_token_with_valid_signature() {
        let handler = handler();
        let two_hours_ago = Utc::now() - Duration::hours(2);
        let issued = handler.issue_at(&admin(), two_hours_ago).unwrap();

        assert_eq!(handler.validate(&issued.token), Err(TokenError::Expired));
    }

    #[test]
    fn test_expired_token_with_foreign_signature() {
        let other = JwtHandler::new(b"another-secret-key-with-enough-bytes-987654", TOKEN_TTL_SECS);
        let issued = other
            .issue_at(&admin(), Utc::now() - Duration::hours(2))
            .unwrap();

        assert_eq!(
            handler().validate(&issued.token),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let claims = Claims {
            sub: "admin".to_string(),
            authorities: vec![Authority::Admin],
            is_admin: true,
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(handler().validate(&token), Err(TokenError::SignatureInvalid));
    }
}
