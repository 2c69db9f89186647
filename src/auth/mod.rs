//! Authentication Module
//! Mission: Stateless JWT login, token validation and role-based access control

pub mod access;
pub mod api;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod models;
pub mod pipeline;
pub mod user_store;

pub use access::{AccessRules, Requirement};
pub use api::AuthState;
pub use credentials::CredentialVerifier;
pub use jwt::JwtHandler;
pub use models::{Authority, Identity};
pub use pipeline::{auth_pipeline, AuthPipeline, AuthSettings};
pub use user_store::{SqliteUserStore, UserStore};
