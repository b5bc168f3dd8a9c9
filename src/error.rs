//! Error types for credential resolution.
//!
//! Cache misses are never errors: the disk cache reports them as `None`.
//! What remains is split by the component that raises it.

use std::path::{Path, PathBuf};

/// Errors raised when persisting or deleting cache entries.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache file or directory could not be written.
    #[error("Cache I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The entry could not be encoded as JSON.
    #[error("Failed to serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The key cannot be turned into a safe file name.
    #[error("Invalid cache key '{0}'")]
    InvalidKey(String),
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors raised while obtaining an SSO access token.
///
/// Variants mirror the OAuth error codes returned by the OIDC service so the
/// device flow can tell "keep polling" apart from a terminal failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The user has not completed the device authorization yet.
    #[error("Authorization pending")]
    AuthorizationPending,

    /// The OIDC service asked the client to poll less often.
    #[error("Slow down")]
    SlowDown,

    /// The device code expired before the user authorized it.
    #[error("Device authorization expired")]
    ExpiredToken,

    /// The user denied the authorization request.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The client registration is unknown or expired on the service side.
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// The grant (device code or refresh token) was rejected.
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// The request was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other error response from the OIDC service.
    #[error("OIDC service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// The service answered with a body that could not be understood.
    #[error("Invalid OIDC response: {0}")]
    InvalidResponse(String),

    /// A refresh was requested for a token without a refresh token.
    #[error("Refresh requested for {0}, but the token has no refresh token")]
    MissingRefreshToken(String),

    /// A refresh was requested without a usable client registration.
    #[error("No client registration available for region {0}")]
    MissingClientRegistration(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Map an OAuth `error` code to the matching variant.
    pub fn from_oauth_code(status: u16, code: &str, description: Option<String>) -> Self {
        let description = description.unwrap_or_default();
        match code {
            "authorization_pending" => Self::AuthorizationPending,
            "slow_down" => Self::SlowDown,
            "expired_token" => Self::ExpiredToken,
            "access_denied" => Self::AccessDenied(description),
            "invalid_client" | "unauthorized_client" => Self::InvalidClient(description),
            "invalid_grant" => Self::InvalidGrant(description),
            "invalid_request" | "invalid_scope" | "unsupported_grant_type" => {
                Self::InvalidRequest(format!("{code}: {description}"))
            }
            other => Self::Service {
                status,
                message: format!("{other}: {description}"),
            },
        }
    }
}

/// Errors raised by the role credential exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The exchange rejected the access token (invalid, expired, or revoked).
    #[error("Access token rejected: {0}")]
    Unauthorized(String),

    /// The caller is being rate limited.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Any other error response.
    #[error("Role credential service error ({status}): {message}")]
    Service { status: u16, message: String },

    /// The service answered with a body that could not be understood.
    #[error("Invalid role credential response: {0}")]
    InvalidResponse(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ExchangeError {
    /// Whether the exchange rejected the access token itself.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Errors returned from [`RoleCredentialProvider::resolve_credentials`].
///
/// [`RoleCredentialProvider::resolve_credentials`]: crate::credentials::RoleCredentialProvider::resolve_credentials
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// No access token could be obtained.
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// The role credential exchange failed.
    #[error("Role credential exchange failed: {0}")]
    Exchange(#[from] ExchangeError),
}

impl CredentialsError {
    /// Whether the access token was rejected by the exchange.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Exchange(e) if e.is_unauthorized())
    }
}
