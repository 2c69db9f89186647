//! HTTP surface: login, the `/users` resource and the health check, all
//! behind the auth pipeline.

pub mod users;

pub use users::{users_router, UsersState};

use crate::auth::{
    api::{self as auth_api, AuthState},
    auth_pipeline, AuthPipeline, CredentialVerifier, JwtHandler, SqliteUserStore,
};
use crate::config::Config;
use crate::middleware::request_logging;
use anyhow::{bail, Context, Result};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// CORS for browser clients. The token header is exposed so they can read it
/// after login.
pub fn cors_layer(origins: &[String], token_header: &HeaderName) -> Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        bail!("CORS_ALLOWED_ORIGINS cannot contain '*' when credentials are allowed");
    }
    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin: {o}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut allowed_headers = vec![header::AUTHORIZATION, header::CONTENT_TYPE];
    if !allowed_headers.contains(token_header) {
        allowed_headers.push(token_header.clone());
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(allowed_headers)
        .expose_headers([token_header.clone()])
        .allow_credentials(true))
}

/// Build the full application from configuration.
pub fn app(config: &Config) -> Result<Router> {
    let user_store = Arc::new(
        SqliteUserStore::new(&config.db_path, config.bcrypt_cost)
            .context("Failed to open user store")?
            // Lock waits must end before the credential lookup gives up
            .with_busy_timeout(config.store_timeout / 2),
    );
    info!("🔐 User store ready at: {}", config.db_path);

    let verifier = Arc::new(CredentialVerifier::new(
        user_store.clone(),
        config.store_timeout,
        config.bcrypt_cost,
    )?);
    let jwt_handler = Arc::new(JwtHandler::new(&config.jwt_secret, config.token_ttl_secs));
    let pipeline = Arc::new(AuthPipeline::new(
        jwt_handler.clone(),
        Arc::new(config.rules.clone()),
        config.auth.clone(),
    ));
    info!(
        rules = config.rules.len(),
        ttl_secs = jwt_handler.ttl_secs(),
        login_path = %pipeline.settings().login_path,
        header = %pipeline.settings().header_name,
        "🛡️ Auth pipeline configured"
    );

    let auth_state = AuthState {
        verifier,
        jwt_handler,
        settings: config.auth.clone(),
    };
    let auth_router = Router::new()
        .route(&config.auth.login_path, post(auth_api::login))
        .with_state(auth_state);

    let cors = cors_layer(&config.cors_origins, &config.auth.header_name)?;

    Ok(Router::new()
        .route("/health", get(health))
        .merge(auth_router)
        .merge(users_router(UsersState { store: user_store }))
        .layer(middleware::from_fn_with_state(pipeline, auth_pipeline))
        .layer(middleware::from_fn(request_logging))
        .layer(cors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::collections::HashMap;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn create_app(extra: &[(&str, &str)]) -> (Router, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let mut vars: HashMap<String, String> = HashMap::from([
            ("JWT_SECRET".to_string(), "router-test-secret-0123456789abcdef".to_string()),
            ("BCRYPT_COST".to_string(), "4".to_string()),
            (
                "AUTH_DB_PATH".to_string(),
                temp_file.path().to_str().unwrap().to_string(),
            ),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
        (app(&config).unwrap(), temp_file)
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _temp) = create_app(&[]);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_needs_identity() {
        let (app, _temp) = create_app(&[]);

        let response = app
            .oneshot(Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cors_preflight_exposes_token_header() {
        let (app, _temp) = create_app(&[]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/users/1")
                    .header(header::ORIGIN, "http://localhost:4200")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:4200"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/users")
                    .header(header::ORIGIN, "http://localhost:4200")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let exposed = response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(exposed.contains("authorization"));
    }

    #[tokio::test]
    async fn test_custom_login_path() {
        let (app, _temp) = create_app(&[("LOGIN_PATH", "/auth/login")]);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"username":"admin","password":"adminpass"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_wildcard_origin_rejected() {
        assert!(cors_layer(&["*".to_string()], &header::AUTHORIZATION).is_err());
        assert!(cors_layer(&["http://a.test".to_string()], &header::AUTHORIZATION).is_ok());
    }
}
