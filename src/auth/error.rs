//! Authentication and authorization errors
//!
//! Every per-request failure ends up here and is turned into a JSON body at the
//! pipeline boundary. Bodies carry fixed messages only.

use crate::auth::models::Authority;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a credential check failed. Only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailure {
    UnknownUser,
    PasswordMismatch,
}

impl CredentialFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialFailure::UnknownUser => "unknown_user",
            CredentialFailure::PasswordMismatch => "password_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Display is identical for both causes.
    #[error("invalid username or password")]
    InvalidCredentials(CredentialFailure),
    #[error("user store unavailable")]
    StoreUnavailable,
}

impl AuthenticationError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthenticationError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            AuthenticationError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            AuthenticationError::InvalidCredentials(_) => "Invalid username or password",
            AuthenticationError::StoreUnavailable => "Authentication temporarily unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
}

impl TokenError {
    /// Stable reason code used in the 401 body and in logs.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("identity {username} lacks any of {required:?}")]
    InsufficientAuthority {
        username: String,
        required: Vec<Authority>,
    },
}

/// `{timestamp, status, error, message, path}` error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
            path: path.into(),
        }
    }
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Body returned when a presented token fails validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenErrorBody {
    pub error: String,
    pub message: String,
}

impl From<TokenError> for TokenErrorBody {
    fn from(err: TokenError) -> Self {
        Self {
            error: err.reason().to_string(),
            message: "token invalid".to_string(),
        }
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(TokenErrorBody::from(self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credentials_hide_cause() {
        let unknown = AuthenticationError::InvalidCredentials(CredentialFailure::UnknownUser);
        let mismatch = AuthenticationError::InvalidCredentials(CredentialFailure::PasswordMismatch);

        assert_eq!(unknown.to_string(), mismatch.to_string());
        assert_eq!(unknown.public_message(), mismatch.public_message());
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::new(StatusCode::UNAUTHORIZED, "nope", "/login");
        assert_eq!(body.status, 401);
        assert_eq!(body.error, "Unauthorized");
        assert_eq!(body.path, "/login");
        assert!(chrono::DateTime::parse_from_rfc3339(&body.timestamp).is_ok());

        let forbidden = ErrorBody::new(StatusCode::FORBIDDEN, "Access denied", "/users");
        assert_eq!(forbidden.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_token_error_response() {
        for err in [TokenError::Malformed, TokenError::SignatureInvalid, TokenError::Expired] {
            let body = TokenErrorBody::from(err);
            assert_eq!(body.message, "token invalid");
            assert_eq!(body.error, err.reason());
            assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
        }
    }
}
