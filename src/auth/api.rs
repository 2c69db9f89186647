//! Authentication API Endpoints
//! Mission: Exchange credentials for a bearer token

use crate::auth::{
    credentials::CredentialVerifier,
    error::ErrorBody,
    jwt::JwtHandler,
    models::{LoginRequest, LoginResponse},
    pipeline::AuthSettings,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<CredentialVerifier>,
    pub jwt_handler: Arc<JwtHandler>,
    pub settings: AuthSettings,
}

/// Login endpoint - POST /login
pub async fn login(
    State(state): State<AuthState>,
    uri: Uri,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let path = uri.path();

    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(path, status = rejection.status().as_u16(), "Malformed login request");
            return ErrorBody::new(StatusCode::BAD_REQUEST, "Malformed login request", path)
                .into_response();
        }
    };

    info!("🔐 Login attempt: {}", payload.username);

    let identity = match state
        .verifier
        .verify(&payload.username, &payload.password)
        .await
    {
        Ok(identity) => identity,
        Err(e) => return ErrorBody::new(e.status(), e.public_message(), path).into_response(),
    };

    let issued = match state.jwt_handler.issue(&identity) {
        Ok(issued) => issued,
        Err(e) => {
            error!(username = identity.username(), error = %e, "Failed to issue token");
            return internal_error(path);
        }
    };

    let header_value =
        match HeaderValue::from_str(&format!("{}{}", state.settings.bearer_prefix, issued.token)) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Bearer prefix produced an invalid header value");
                return internal_error(path);
            }
        };

    info!(
        "✅ Login successful: {} (admin: {})",
        identity.username(),
        identity.is_admin()
    );

    let username = identity.username().to_string();
    let body = LoginResponse {
        token: issued.token,
        message: format!("Hello {username}, you have logged in successfully"),
        username,
    };

    (
        StatusCode::OK,
        [(state.settings.header_name.clone(), header_value)],
        Json(body),
    )
        .into_response()
}

fn internal_error(path: &str) -> Response {
    ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", path).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{jwt::TOKEN_TTL_SECS, user_store::SqliteUserStore};
    use axum::{
        body::Body,
        http::{header, Request},
        routing::post,
        Router,
    };
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"login-test-secret-with-enough-bytes-0042";

    fn create_app() -> (Router, Arc<JwtHandler>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteUserStore::new(temp_file.path().to_str().unwrap(), 4).unwrap();
        let verifier = CredentialVerifier::new(Arc::new(store), Duration::from_secs(5), 4).unwrap();
        let jwt_handler = Arc::new(JwtHandler::new(SECRET, TOKEN_TTL_SECS));

        let state = AuthState {
            verifier: Arc::new(verifier),
            jwt_handler: jwt_handler.clone(),
            settings: AuthSettings::default(),
        };
        let app = Router::new().route("/login", post(login)).with_state(state);
        (app, jwt_handler, temp_file)
    }

    fn login_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_login_success() {
        let (app, jwt_handler, _temp) = create_app();

        let response = app
            .oneshot(login_request(r#"{"username":"admin","password":"adminpass"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let header = response
            .headers()
            .get(header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = json_body(response).await;

        let token = body["token"].as_str().unwrap();
        assert_eq!(header, format!("Bearer {token}"));
        assert_eq!(body["username"], "admin");
        assert!(body["message"].as_str().unwrap().contains("admin"));

        let identity = jwt_handler.validate(token).unwrap();
        assert!(identity.is_admin());
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (app, _, _temp) = create_app();

        let wrong = app
            .clone()
            .oneshot(login_request(r#"{"username":"admin","password":"nope"}"#))
            .await
            .unwrap();
        let unknown = app
            .oneshot(login_request(r#"{"username":"ghost","password":"nope"}"#))
            .await
            .unwrap();

        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert!(wrong.headers().get(header::AUTHORIZATION).is_none());

        let mut wrong = json_body(wrong).await;
        let mut unknown = json_body(unknown).await;
        assert_eq!(wrong["status"], 401);
        assert_eq!(wrong["error"], "Unauthorized");
        assert_eq!(wrong["path"], "/login");

        wrong["timestamp"] = serde_json::Value::Null;
        unknown["timestamp"] = serde_json::Value::Null;
        assert_eq!(wrong, unknown);
    }

    #[tokio::test]
    async fn test_malformed_login_body_is_bad_request() {
        let (app, _, _temp) = create_app();

        for body in ["not json", r#"{"username":"admin"}"#, ""] {
            let response = app.clone().oneshot(login_request(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = json_body(response).await;
            assert_eq!(body["error"], "Bad Request");
        }
    }
}
