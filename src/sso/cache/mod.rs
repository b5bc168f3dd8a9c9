//! Storage for client registrations and access tokens.
//!
//! [`SsoCache`] is the seam the access token provider reads and writes
//! through. [`DiskCache`] is the durable implementation; [`MemoryCache`]
//! keeps everything in-process.
//!
//! Loads never fail: an absent, unreadable, corrupt, or expired entry is
//! reported as `None`. Writes and removals report their errors.

mod disk;
mod memory;

pub use disk::{CLIENT_REGISTRATION_PREFIX, DiskCache, access_token_cache_key};
pub use memory::MemoryCache;

use crate::error::CacheError;
use crate::sso::models::{AccessToken, ClientRegistration};

/// Cache of SSO client registrations (per region) and access tokens
/// (per start URL).
pub trait SsoCache: Send + Sync {
    /// Load the unexpired client registration for an OIDC region.
    fn load_client_registration(&self, region: &str) -> Option<ClientRegistration>;

    /// Store the client registration for an OIDC region, replacing any
    /// previous one.
    fn save_client_registration(
        &self,
        region: &str,
        registration: &ClientRegistration,
    ) -> Result<(), CacheError>;

    /// Forget the client registration for an OIDC region.
    fn invalidate_client_registration(&self, region: &str) -> Result<(), CacheError>;

    /// Load the unexpired access token for a start URL.
    fn load_access_token(&self, start_url: &str) -> Option<AccessToken>;

    /// Load the access token for a start URL whether or not it has expired.
    ///
    /// Used to recover a refresh token from an expired entry.
    fn peek_access_token(&self, start_url: &str) -> Option<AccessToken>;

    /// Store the access token for a start URL, replacing any previous one.
    fn save_access_token(&self, start_url: &str, token: &AccessToken) -> Result<(), CacheError>;

    /// Forget the access token for a start URL.
    fn invalidate_access_token(&self, start_url: &str) -> Result<(), CacheError>;

    /// Name of this cache backend.
    fn name(&self) -> &str;
}
