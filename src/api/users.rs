//! Users API
//! Mission: The protected `/users` resource behind the auth pipeline
//!
//! Access rules are enforced before these handlers run; the handlers only
//! deal with the resource itself.

use crate::auth::{
    models::Identity,
    user_store::{NewUser, SqliteUserStore, StoreError, UserRecord, UserUpdate},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

pub const PAGE_SIZE: u32 = 4;

#[derive(Clone)]
pub struct UsersState {
    pub store: Arc<SqliteUserStore>,
}

#[derive(Debug, Error)]
pub enum UserApiError {
    #[error("user not found")]
    NotFound,
    #[error("validation failed")]
    Validation(BTreeMap<String, String>),
    #[error("username {0} already exists")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for UserApiError {
    fn into_response(self) -> Response {
        match self {
            UserApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "User not found" }))).into_response()
            }
            UserApiError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Validation failed", "fields": fields })),
            )
                .into_response(),
            UserApiError::Conflict(username) => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "Conflict",
                    "message": format!("Username {username} already exists"),
                })),
            )
                .into_response(),
            UserApiError::Internal(detail) => {
                error!(detail = %detail, "Users API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for UserApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(username) => UserApiError::Conflict(username),
            other => UserApiError::Internal(other.to_string()),
        }
    }
}

/// Request body for create and update. Password is only read on create.
#[derive(Debug, Deserialize)]
pub struct UserPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

impl UserPayload {
    fn validate(&self, require_password: bool) -> Result<(), UserApiError> {
        let mut fields = BTreeMap::new();

        if self.name.trim().is_empty() {
            fields.insert("name".to_string(), "must not be blank".to_string());
        }
        if self.lastname.trim().is_empty() {
            fields.insert("lastname".to_string(), "must not be blank".to_string());
        }
        let username_len = self.username.trim().chars().count();
        if !(4..=12).contains(&username_len) {
            fields.insert(
                "username".to_string(),
                "must be between 4 and 12 characters".to_string(),
            );
        }
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            fields.insert("email".to_string(), "must be a valid email address".to_string());
        }
        if require_password && self.password.as_deref().map_or(true, |p| p.is_empty()) {
            fields.insert("password".to_string(), "must not be blank".to_string());
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(UserApiError::Validation(fields))
        }
    }

    fn into_new_user(self) -> NewUser {
        NewUser {
            name: self.name.trim().to_string(),
            lastname: self.lastname.trim().to_string(),
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password.unwrap_or_default(),
            admin: self.admin,
        }
    }

    fn into_update(self) -> UserUpdate {
        UserUpdate {
            name: self.name.trim().to_string(),
            lastname: self.lastname.trim().to_string(),
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            admin: self.admin,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub content: Vec<UserRecord>,
    pub total_elements: u64,
    pub total_pages: u64,
    pub number: u32,
    pub size: u32,
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(state: &UsersState, f: F) -> Result<T, UserApiError>
where
    T: Send + 'static,
    F: FnOnce(&SqliteUserStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| UserApiError::Internal(e.to_string()))?
        .map_err(UserApiError::from)
}

fn parse_body(payload: Result<Json<UserPayload>, JsonRejection>) -> Result<UserPayload, UserApiError> {
    payload.map(|Json(p)| p).map_err(|rejection| {
        UserApiError::Validation(BTreeMap::from([(
            "body".to_string(),
            rejection.body_text(),
        )]))
    })
}

fn actor(identity: &Option<Extension<Identity>>) -> &str {
    identity
        .as_ref()
        .map(|Extension(i)| i.username())
        .unwrap_or("anonymous")
}

pub async fn list_users(State(state): State<UsersState>) -> Result<Json<Vec<UserRecord>>, UserApiError> {
    let users = with_store(&state, |store| store.list_users()).await?;
    Ok(Json(users))
}

pub async fn page_users(
    State(state): State<UsersState>,
    Path(page): Path<u32>,
) -> Result<Json<UserPage>, UserApiError> {
    let (content, total) = with_store(&state, move |store| store.page_users(page, PAGE_SIZE)).await?;
    Ok(Json(UserPage {
        content,
        total_elements: total,
        total_pages: total.div_ceil(u64::from(PAGE_SIZE)),
        number: page,
        size: PAGE_SIZE,
    }))
}

pub async fn get_user(
    State(state): State<UsersState>,
    Path(id): Path<i64>,
) -> Result<Json<UserRecord>, UserApiError> {
    with_store(&state, move |store| store.get_user(id))
        .await?
        .map(Json)
        .ok_or(UserApiError::NotFound)
}

pub async fn create_user(
    State(state): State<UsersState>,
    identity: Option<Extension<Identity>>,
    payload: Result<Json<UserPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<UserRecord>), UserApiError> {
    let payload = parse_body(payload)?;
    payload.validate(true)?;

    let new_user = payload.into_new_user();
    let created = with_store(&state, move |store| store.create_user(&new_user)).await?;

    info!(id = created.id, by = actor(&identity), "User created via API");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_user(
    State(state): State<UsersState>,
    Path(id): Path<i64>,
    identity: Option<Extension<Identity>>,
    payload: Result<Json<UserPayload>, JsonRejection>,
) -> Result<Json<UserRecord>, UserApiError> {
    let payload = parse_body(payload)?;
    payload.validate(false)?;

    let update = payload.into_update();
    let updated = with_store(&state, move |store| store.update_user(id, &update))
        .await?
        .ok_or(UserApiError::NotFound)?;

    info!(id, by = actor(&identity), "User updated via API");
    Ok(Json(updated))
}

pub async fn delete_user(
    State(state): State<UsersState>,
    Path(id): Path<i64>,
    identity: Option<Extension<Identity>>,
) -> Result<StatusCode, UserApiError> {
    if !with_store(&state, move |store| store.delete_user(id)).await? {
        return Err(UserApiError::NotFound);
    }

    info!(id, by = actor(&identity), "User deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

/// `/users` routes
pub fn users_router(state: UsersState) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/page/:page", get(page_users))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .with_state(state)
}
