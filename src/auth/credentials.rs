//! Credential Verifier
//! Mission: Check a username/password pair against the user store

use crate::auth::{
    error::{AuthenticationError, CredentialFailure},
    models::{Identity, StoredIdentity},
    user_store::UserStore,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Verifies login credentials. Read-only against the store.
pub struct CredentialVerifier {
    store: Arc<dyn UserStore>,
    lookup_timeout: Duration,
    // Compared against when the username is unknown, so both failure paths
    // spend the same bcrypt time.
    dummy_hash: String,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn UserStore>, lookup_timeout: Duration, bcrypt_cost: u32) -> Result<Self> {
        let dummy_hash = bcrypt::hash("gatekeeper-dummy-password", bcrypt_cost)
            .context("Failed to prepare dummy password hash")?;

        Ok(Self {
            store,
            lookup_timeout,
            dummy_hash,
        })
    }

    pub async fn verify(&self, username: &str, password: &str) -> Result<Identity, AuthenticationError> {
        let stored = self.lookup(username).await?;

        let hash = stored
            .as_ref()
            .map(|s| s.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let candidate = password.to_string();

        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
            .await
            .map_err(|e| {
                error!(error = %e, "Password check task failed");
                AuthenticationError::StoreUnavailable
            })?
            .unwrap_or_else(|e| {
                warn!(username, error = %e, "Stored password hash is unreadable");
                false
            });

        let failure = match stored {
            Some(stored) if matches => {
                debug!(username, "Credentials verified");
                return Ok(Identity::new(stored.username, stored.authorities));
            }
            Some(_) => CredentialFailure::PasswordMismatch,
            None => CredentialFailure::UnknownUser,
        };

        warn!(username, reason = failure.as_str(), "❌ Failed login attempt");
        Err(AuthenticationError::InvalidCredentials(failure))
    }

    async fn lookup(
        &self,
        username: &str,
    ) -> Result<Option<StoredIdentity>, AuthenticationError> {
        let store = Arc::clone(&self.store);
        let name = username.to_string();
        let lookup = tokio::task::spawn_blocking(move || store.find_by_username(&name));

        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(Ok(stored))) => Ok(stored),
            Ok(Ok(Err(e))) => {
                error!(username, error = %e, "User store lookup failed");
                Err(AuthenticationError::StoreUnavailable)
            }
            Ok(Err(e)) => {
                error!(username, error = %e, "User store lookup task failed");
                Err(AuthenticationError::StoreUnavailable)
            }
            Err(_) => {
                warn!(
                    username,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "User store lookup timed out"
                );
                Err(AuthenticationError::StoreUnavailable)
            }
        }
    }
}
