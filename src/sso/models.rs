//! SSO token types persisted by the disk cache and exchanged with OIDC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::timestamp::{format_instant, iso_instant};
use crate::error::AuthError;

/// Grant type for polling a device authorization.
pub const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Grant type for exchanging a refresh token.
pub const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Client type used for every registration.
pub const PUBLIC_CLIENT_TYPE: &str = "public";

/// Instant `expires_in` seconds after `start`.
///
/// Service lifetimes must be positive and land inside chrono's range.
pub fn expiry_after(start: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>, AuthError> {
    if expires_in <= 0 {
        return Err(AuthError::InvalidResponse(format!(
            "expiresIn must be positive, got {expires_in}"
        )));
    }
    chrono::TimeDelta::try_seconds(expires_in)
        .and_then(|lifetime| start.checked_add_signed(lifetime))
        .ok_or_else(|| AuthError::InvalidResponse(format!("expiresIn out of range: {expires_in}")))
}

/// An OIDC client identity, registered once per SSO region.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    #[serde(with = "iso_instant")]
    pub expires_at: DateTime<Utc>,
}

impl ClientRegistration {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            expires_at,
        }
    }

    /// A registration is usable strictly before its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("expires_at", &format_instant(&self.expires_at))
            .finish()
    }
}

/// An SSO access token for one start URL.
///
/// Field order is the on-disk order. `refresh_token` is only written when
/// present so that files stay readable by tools expecting the four-field
/// layout.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub start_url: String,
    pub region: String,
    pub access_token: String,
    #[serde(with = "iso_instant")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl AccessToken {
    pub fn new(
        start_url: impl Into<String>,
        region: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            start_url: start_url.into(),
            region: region.into(),
            access_token: access_token.into(),
            expires_at,
            refresh_token: None,
        }
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// A token is usable strictly before its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the token can be renewed without user interaction.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("start_url", &self.start_url)
            .field("region", &self.region)
            .field("access_token", &"<redacted>")
            .field("expires_at", &format_instant(&self.expires_at))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Parameters of an OIDC client registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClientRequest {
    pub client_name: String,
    pub client_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl RegisterClientRequest {
    pub fn public(client_name: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_name: client_name.into(),
            client_type: PUBLIC_CLIENT_TYPE.to_string(),
            scopes,
        }
    }
}

/// Response to a device authorization request, as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorizationResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Seconds until the device code expires.
    pub expires_in: i64,
    /// Minimum seconds between polls, if the service specified one.
    #[serde(default)]
    pub interval: Option<i64>,
}

/// A pending device authorization the user must approve in a browser.
///
/// Only good for one token; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub poll_interval: Duration,
    pub created_at: DateTime<Utc>,
}

impl DeviceAuthorization {
    /// Resolve a service response against the instant it was received.
    pub fn from_response(
        response: DeviceAuthorizationResponse,
        created_at: DateTime<Utc>,
        default_interval: Duration,
    ) -> Result<Self, AuthError> {
        let poll_interval = response
            .interval
            .and_then(|secs| u64::try_from(secs).ok())
            .map(Duration::from_secs)
            .unwrap_or(default_interval);

        let expires_at = expiry_after(created_at, response.expires_in)?;

        Ok(Self {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            verification_uri_complete: response.verification_uri_complete,
            expires_at,
            poll_interval,
            created_at,
        })
    }

    /// The URL to show the user, preferring the one with the code embedded.
    pub fn display_uri(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

/// Grant presented to the OIDC `CreateToken` operation.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    DeviceCode(String),
    RefreshToken(String),
}

impl TokenGrant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::DeviceCode(_) => DEVICE_GRANT_TYPE,
            Self::RefreshToken(_) => REFRESH_GRANT_TYPE,
        }
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceCode(_) => f.write_str("DeviceCode(<redacted>)"),
            Self::RefreshToken(_) => f.write_str("RefreshToken(<redacted>)"),
        }
    }
}

/// Response of the OIDC `CreateToken` operation.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}
