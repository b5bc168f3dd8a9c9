//! AWS SSO OIDC client.
//!
//! Three operations are used: `RegisterClient`, `StartDeviceAuthorization`
//! and `CreateToken`. All take camelCase JSON bodies at
//! `https://oidc.{region}.amazonaws.com`.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::models::{
    ClientRegistration, DeviceAuthorizationResponse, RegisterClientRequest, TokenGrant,
    TokenResponse,
};
use crate::error::AuthError;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Regional OIDC endpoint.
pub fn oidc_endpoint(region: &str) -> String {
    format!("https://oidc.{region}.amazonaws.com")
}

/// The OIDC operations needed to obtain SSO access tokens.
#[async_trait]
pub trait SsoOidc: Send + Sync {
    /// Register a new public client.
    async fn register_client(
        &self,
        request: &RegisterClientRequest,
    ) -> Result<ClientRegistration, AuthError>;

    /// Begin a device authorization for `start_url`.
    async fn start_device_authorization(
        &self,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorizationResponse, AuthError>;

    /// Exchange a device code or refresh token for an access token.
    ///
    /// While the user has not finished authorizing a device code this
    /// returns [`AuthError::AuthorizationPending`] or [`AuthError::SlowDown`].
    async fn create_token(
        &self,
        registration: &ClientRegistration,
        grant: &TokenGrant,
    ) -> Result<TokenResponse, AuthError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientResponse {
    client_id: String,
    client_secret: String,
    /// Epoch seconds.
    client_secret_expires_at: i64,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default, alias = "errorDescription")]
    error_description: Option<String>,
}

/// HTTP implementation of [`SsoOidc`].
#[derive(Debug, Clone)]
pub struct HttpSsoOidcClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSsoOidcClient {
    /// Client for the regional endpoint with the default timeout.
    pub fn new(region: &str) -> Result<Self, AuthError> {
        Self::with_endpoint(oidc_endpoint(region), DEFAULT_TIMEOUT)
    }

    /// Client for an explicit endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Client reusing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<T, AuthError> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(format!("{path}: {e}")))
    }
}

/// Turn an error response into an [`AuthError`], using the OAuth `error`
/// code when the body carries one.
fn error_from_body(status: u16, body: &str) -> AuthError {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(err) => AuthError::from_oauth_code(status, &err.error, err.error_description),
        Err(_) => AuthError::Service {
            status,
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl SsoOidc for HttpSsoOidcClient {
    #[instrument(skip(self, request), fields(client_name = %request.client_name))]
    async fn register_client(
        &self,
        request: &RegisterClientRequest,
    ) -> Result<ClientRegistration, AuthError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
        let data: RegisterClientResponse = self.post("/client/register", &payload).await?;

        let expires_at = DateTime::from_timestamp(data.client_secret_expires_at, 0).ok_or_else(|| {
            AuthError::InvalidResponse(format!(
                "clientSecretExpiresAt out of range: {}",
                data.client_secret_expires_at
            ))
        })?;

        info!("Registered SSO OIDC client");
        Ok(ClientRegistration::new(
            data.client_id,
            data.client_secret,
            expires_at,
        ))
    }

    #[instrument(skip(self, registration))]
    async fn start_device_authorization(
        &self,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorizationResponse, AuthError> {
        let payload = serde_json::json!({
            "clientId": registration.client_id,
            "clientSecret": registration.client_secret,
            "startUrl": start_url,
        });
        let data: DeviceAuthorizationResponse = self.post("/device_authorization", &payload).await?;
        debug!(expires_in = data.expires_in, "Device authorization started");
        Ok(data)
    }

    #[instrument(skip(self, registration, grant), fields(grant_type = grant.grant_type()))]
    async fn create_token(
        &self,
        registration: &ClientRegistration,
        grant: &TokenGrant,
    ) -> Result<TokenResponse, AuthError> {
        let mut payload = serde_json::json!({
            "clientId": registration.client_id,
            "clientSecret": registration.client_secret,
            "grantType": grant.grant_type(),
        });
        match grant {
            TokenGrant::DeviceCode(code) => payload["deviceCode"] = code.as_str().into(),
            TokenGrant::RefreshToken(token) => payload["refreshToken"] = token.as_str().into(),
        }

        let data: TokenResponse = self.post("/token", &payload).await?;
        if data.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "token response does not contain accessToken".into(),
            ));
        }
        Ok(data)
    }
}
