//! Request Pipeline
//! Mission: Resolve who is calling and whether they may, before any handler runs
//!
//! Every request goes through an ordered list of stages. A stage either hands
//! the (possibly updated) principal to the next stage or halts with a
//! rejection, which becomes the one and only response for that request.

use crate::auth::{
    access::{AccessRules, Decision, Denial, Requirement},
    error::{AuthorizationError, ErrorBody, TokenError},
    jwt::JwtHandler,
    models::Identity,
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the bearer credential lives and which path is the login endpoint.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub header_name: HeaderName,
    pub bearer_prefix: String,
    pub login_path: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            header_name: axum::http::header::AUTHORIZATION,
            bearer_prefix: "Bearer ".to_string(),
            login_path: "/login".to_string(),
        }
    }
}

/// The parts of a request the stages look at.
pub struct RequestHead<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Authenticated(Identity),
}

impl Principal {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Principal::Anonymous => None,
            Principal::Authenticated(identity) => Some(identity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A credential was presented and failed validation.
    InvalidToken(TokenError),
    /// No credential, but the route needs one.
    Unauthenticated,
    Forbidden(AuthorizationError),
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::InvalidToken(_) | Rejection::Unauthenticated => StatusCode::UNAUTHORIZED,
            Rejection::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    pub fn respond(self, path: &str) -> Response {
        match self {
            Rejection::InvalidToken(err) => err.into_response(),
            Rejection::Unauthenticated => {
                ErrorBody::new(StatusCode::UNAUTHORIZED, "Authentication required", path)
                    .into_response()
            }
            Rejection::Forbidden(_) => {
                ErrorBody::new(StatusCode::FORBIDDEN, "Access denied", path).into_response()
            }
        }
    }
}

pub enum Flow {
    Continue(Principal),
    Halt(Rejection),
}

type Stage = fn(&AuthPipeline, &RequestHead<'_>, Principal) -> Flow;

const STAGES: &[Stage] = &[resolve_bearer, enforce_access];

/// Token validation followed by access control. Read-only after startup.
pub struct AuthPipeline {
    jwt: Arc<JwtHandler>,
    rules: Arc<AccessRules>,
    settings: AuthSettings,
}

impl AuthPipeline {
    pub fn new(jwt: Arc<JwtHandler>, rules: Arc<AccessRules>, settings: AuthSettings) -> Self {
        Self {
            jwt,
            rules,
            settings,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn is_login(&self, path: &str) -> bool {
        path.trim_end_matches('/') == self.settings.login_path.trim_end_matches('/')
    }

    /// Run every stage in order, starting from an anonymous principal.
    pub fn evaluate(&self, head: &RequestHead<'_>) -> Result<Principal, Rejection> {
        let mut principal = Principal::Anonymous;
        for stage in STAGES {
            match stage(self, head, principal) {
                Flow::Continue(next) => principal = next,
                Flow::Halt(rejection) => return Err(rejection),
            }
        }
        Ok(principal)
    }

    fn bearer_token<'h>(&self, headers: &'h HeaderMap) -> Option<&'h str> {
        headers
            .get(&self.settings.header_name)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix(self.settings.bearer_prefix.as_str()))
    }
}

fn resolve_bearer(pipeline: &AuthPipeline, head: &RequestHead<'_>, principal: Principal) -> Flow {
    let Some(token) = pipeline.bearer_token(head.headers) else {
        return Flow::Continue(principal);
    };

    match pipeline.jwt.validate(token.trim()) {
        Ok(identity) => Flow::Continue(Principal::Authenticated(identity)),
        Err(err) => {
            warn!(
                method = %head.method,
                path = head.path,
                reason = err.reason(),
                "Rejected bearer token"
            );
            Flow::Halt(Rejection::InvalidToken(err))
        }
    }
}

fn enforce_access(pipeline: &AuthPipeline, head: &RequestHead<'_>, principal: Principal) -> Flow {
    match pipeline
        .rules
        .authorize(head.method, head.path, principal.identity())
    {
        Decision::Allow => Flow::Continue(principal),
        Decision::Deny(Denial::Unauthorized) => {
            debug!(method = %head.method, path = head.path, "Authentication required");
            Flow::Halt(Rejection::Unauthenticated)
        }
        Decision::Deny(Denial::Forbidden) => {
            let required = match pipeline.rules.requirement_for(head.method, head.path) {
                Requirement::AnyOf(accepted) => accepted.clone(),
                _ => Vec::new(),
            };
            let username = principal
                .identity()
                .map(|i| i.username().to_string())
                .unwrap_or_default();
            let err = AuthorizationError::InsufficientAuthority { username, required };
            warn!(method = %head.method, path = head.path, "⛔ {}", err);
            Flow::Halt(Rejection::Forbidden(err))
        }
    }
}

/// Axum middleware running the pipeline in front of every route.
///
/// The login endpoint skips the stages entirely. On success the resolved
/// identity is attached to the request extensions for the handler.
pub async fn auth_pipeline(
    State(pipeline): State<Arc<AuthPipeline>>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if pipeline.is_login(&path) {
        return next.run(req).await;
    }

    let outcome = pipeline.evaluate(&RequestHead {
        method: req.method(),
        path: &path,
        headers: req.headers(),
    });

    match outcome {
        Ok(Principal::Authenticated(identity)) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Ok(Principal::Anonymous) => next.run(req).await,
        Err(rejection) => rejection.respond(&path),
    }
}
