//! In-memory SSO cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

use super::SsoCache;
use crate::clock::{SharedClock, system_clock};
use crate::error::CacheError;
use crate::sso::models::{AccessToken, ClientRegistration};

#[derive(Debug, Default)]
struct Entries {
    registrations: HashMap<String, ClientRegistration>,
    tokens: HashMap<String, AccessToken>,
}

/// In-memory SSO cache.
///
/// Nothing survives the process. Useful for tests and for sessions that
/// must not touch the shared cache directory. Clones share the same
/// entries.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<RwLock<Entries>>,
    clock: SharedClock,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Create an empty cache using the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Create an empty cache judging expiry against `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Entries::default())),
            clock,
        }
    }

    /// Number of stored access tokens, expired ones included.
    pub fn token_count(&self) -> usize {
        self.read().tokens.len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut guard = self.write();
        guard.registrations.clear();
        guard.tokens.clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SsoCache for MemoryCache {
    #[instrument(skip(self))]
    fn load_client_registration(&self, region: &str) -> Option<ClientRegistration> {
        let registration = self.read().registrations.get(region).cloned()?;
        (!registration.is_expired_at(self.clock.now())).then_some(registration)
    }

    #[instrument(skip(self, registration))]
    fn save_client_registration(
        &self,
        region: &str,
        registration: &ClientRegistration,
    ) -> Result<(), CacheError> {
        self.write()
            .registrations
            .insert(region.to_string(), registration.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    fn invalidate_client_registration(&self, region: &str) -> Result<(), CacheError> {
        self.write().registrations.remove(region);
        Ok(())
    }

    #[instrument(skip(self))]
    fn load_access_token(&self, start_url: &str) -> Option<AccessToken> {
        let token = self.peek_access_token(start_url)?;
        (!token.is_expired_at(self.clock.now())).then_some(token)
    }

    #[instrument(skip(self))]
    fn peek_access_token(&self, start_url: &str) -> Option<AccessToken> {
        self.read().tokens.get(start_url).cloned()
    }

    #[instrument(skip(self, token))]
    fn save_access_token(&self, start_url: &str, token: &AccessToken) -> Result<(), CacheError> {
        self.write()
            .tokens
            .insert(start_url.to_string(), token.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    fn invalidate_access_token(&self, start_url: &str) -> Result<(), CacheError> {
        self.write().tokens.remove(start_url);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.read();
        f.debug_struct("MemoryCache")
            .field("registrations", &guard.registrations.len())
            .field("tokens", &guard.tokens.len())
            .finish()
    }
}
