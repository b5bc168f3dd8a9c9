//! Role credential exchange against the SSO portal.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use super::models::ResolvedCredentials;
use crate::error::ExchangeError;

/// Header carrying the SSO access token.
pub const BEARER_TOKEN_HEADER: &str = "x-amz-sso_bearer_token";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Regional SSO portal endpoint.
pub fn portal_endpoint(region: &str) -> String {
    format!("https://portal.sso.{region}.amazonaws.com")
}

/// Trades an SSO access token for role credentials.
#[async_trait]
pub trait RoleCredentialExchange: Send + Sync {
    /// Fetch credentials for `role_name` in `account_id`.
    ///
    /// Fails with [`ExchangeError::Unauthorized`] when the access token
    /// itself was rejected.
    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<ResolvedCredentials, ExchangeError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRoleCredentialsResponse {
    role_credentials: RoleCredentials,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    /// Epoch milliseconds.
    expiration: i64,
}

#[derive(Deserialize)]
struct PortalErrorBody {
    #[serde(alias = "Message")]
    message: String,
}

/// HTTP implementation of [`RoleCredentialExchange`] using
/// `GET /federation/credentials`.
#[derive(Debug, Clone)]
pub struct HttpRoleCredentialExchange {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRoleCredentialExchange {
    /// Exchange for the regional portal with the default timeout.
    pub fn new(region: &str) -> Result<Self, ExchangeError> {
        Self::with_endpoint(portal_endpoint(region), DEFAULT_TIMEOUT)
    }

    /// Exchange for an explicit endpoint.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Exchange reusing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn error_from_response(status: u16, body: &str) -> ExchangeError {
    let message = serde_json::from_str::<PortalErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.to_string());
    match status {
        401 => ExchangeError::Unauthorized(message),
        429 => ExchangeError::Throttled(message),
        _ => ExchangeError::Service { status, message },
    }
}

#[async_trait]
impl RoleCredentialExchange for HttpRoleCredentialExchange {
    #[instrument(skip(self, access_token))]
    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<ResolvedCredentials, ExchangeError> {
        let url = format!("{}/federation/credentials", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("role_name", role_name), ("account_id", account_id)])
            .header(BEARER_TOKEN_HEADER, access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &body));
        }

        let data: GetRoleCredentialsResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;
        let creds = data.role_credentials;
        let expiration = DateTime::from_timestamp_millis(creds.expiration).ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("expiration out of range: {}", creds.expiration))
        })?;

        debug!("Received role credentials");
        Ok(ResolvedCredentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            creds.session_token,
            expiration,
        ))
    }
}
