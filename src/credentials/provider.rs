//! Role credentials with in-memory caching.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::exchange::RoleCredentialExchange;
use super::models::ResolvedCredentials;
use crate::clock::{SharedClock, system_clock};
use crate::error::CredentialsError;
use crate::sso::access_token::AccessTokenProvider;

/// Resolves credentials for one account and role.
///
/// Credentials are kept in memory until they expire. When the exchange
/// rejects the access token, the token is invalidated upstream so the next
/// resolution authenticates again.
pub struct RoleCredentialProvider {
    account_id: String,
    role_name: String,
    token_provider: Arc<dyn AccessTokenProvider>,
    exchange: Arc<dyn RoleCredentialExchange>,
    clock: SharedClock,
    cached: Mutex<Option<ResolvedCredentials>>,
}

impl RoleCredentialProvider {
    pub fn new(
        account_id: impl Into<String>,
        role_name: impl Into<String>,
        token_provider: Arc<dyn AccessTokenProvider>,
        exchange: Arc<dyn RoleCredentialExchange>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            role_name: role_name.into(),
            token_provider,
            exchange,
            clock: system_clock(),
            cached: Mutex::new(None),
        }
    }

    /// Set the clock credentials expiry is judged against.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    /// Return valid role credentials, exchanging a fresh access token when
    /// the cached ones are missing or expired.
    #[instrument(skip(self), fields(account_id = %self.account_id, role_name = %self.role_name))]
    pub async fn resolve_credentials(&self) -> Result<ResolvedCredentials, CredentialsError> {
        let mut cached = self.cached.lock().await;

        if let Some(creds) = cached.as_ref() {
            if !creds.is_expired_at(self.clock.now()) {
                debug!("Using cached role credentials");
                return Ok(creds.clone());
            }
            debug!("Cached role credentials expired");
        }

        let token = self.token_provider.access_token().await?;

        match self
            .exchange
            .get_role_credentials(&token.access_token, &self.account_id, &self.role_name)
            .await
        {
            Ok(creds) => {
                info!("Resolved role credentials");
                *cached = Some(creds.clone());
                Ok(creds)
            }
            Err(e) if e.is_unauthorized() => {
                warn!(error = %e, "Access token rejected, invalidating it");
                *cached = None;
                if let Err(ie) = self.token_provider.invalidate().await {
                    warn!(error = %ie, "Failed to invalidate access token");
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for RoleCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleCredentialProvider")
            .field("account_id", &self.account_id)
            .field("role_name", &self.role_name)
            .finish()
    }
}
