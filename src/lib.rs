//! Gatekeeper Backend Library
//!
//! Stateless JWT authentication and role-based access control in front of a
//! small `/users` resource. Exposed as a library so binaries and tests share
//! one router.

pub mod api;
pub mod auth;
pub mod config;
pub mod middleware;

pub use api::app;
pub use config::{Config, ConfigError};
