#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use sso_creds::credentials::RoleCredentialExchange;
use sso_creds::error::{AuthError, ExchangeError};
use sso_creds::sso::models::{
    ClientRegistration, DeviceAuthorizationResponse, RegisterClientRequest, TokenGrant,
    TokenResponse,
};
use sso_creds::sso::SsoOidc;
use sso_creds::ResolvedCredentials;

pub const SSO_URL: &str = "https://123456.awsapps.com/start";
pub const SSO_REGION: &str = "us-west-2";
pub const ACCOUNT_ID: &str = "111122223333";
pub const ROLE_NAME: &str = "ReadOnly";
pub const TOKEN_FILE: &str = "c1ac99f782ad92755c6de8647b510ec247330ad1.json";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn write_token_file(dir: &std::path::Path, access_token: &str, expires_at: &str) {
    std::fs::write(
        dir.join(TOKEN_FILE),
        format!(
            r#"{{"startUrl": "{SSO_URL}", "region": "{SSO_REGION}", "accessToken": "{access_token}", "expiresAt": "{expires_at}"}}"#
        ),
    )
    .unwrap();
}

/// OIDC service that always authorizes on the first poll.
#[derive(Default)]
pub struct ScriptedOidc {
    pub registrations: AtomicUsize,
    pub device_authorizations: AtomicUsize,
    pub tokens_issued: AtomicUsize,
}

#[async_trait]
impl SsoOidc for ScriptedOidc {
    async fn register_client(
        &self,
        _request: &RegisterClientRequest,
    ) -> Result<ClientRegistration, AuthError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(ClientRegistration::new("client-id", "client-secret", now() + Duration::days(90)))
    }

    async fn start_device_authorization(
        &self,
        _registration: &ClientRegistration,
        _start_url: &str,
    ) -> Result<DeviceAuthorizationResponse, AuthError> {
        self.device_authorizations.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceAuthorizationResponse {
            device_code: "device-code".into(),
            user_code: "WXYZ-1234".into(),
            verification_uri: "https://device.sso.us-west-2.amazonaws.com/".into(),
            verification_uri_complete: None,
            expires_in: 600,
            interval: Some(1),
        })
    }

    async fn create_token(
        &self,
        _registration: &ClientRegistration,
        grant: &TokenGrant,
    ) -> Result<TokenResponse, AuthError> {
        assert!(matches!(grant, TokenGrant::DeviceCode(_)));
        let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenResponse {
            access_token: format!("issued-token-{n}"),
            refresh_token: None,
            expires_in: 28_800,
        })
    }
}

/// Role credential exchange answering from a script and recording the
/// access tokens it was shown.
pub struct ScriptedExchange {
    results: Mutex<VecDeque<Result<ResolvedCredentials, ExchangeError>>>,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl ScriptedExchange {
    pub fn new(results: Vec<Result<ResolvedCredentials, ExchangeError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            seen_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen_tokens.lock().unwrap().len()
    }
}

#[async_trait]
impl RoleCredentialExchange for ScriptedExchange {
    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<ResolvedCredentials, ExchangeError> {
        assert_eq!(account_id, ACCOUNT_ID);
        assert_eq!(role_name, ROLE_NAME);
        self.seen_tokens.lock().unwrap().push(access_token.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExchangeError::InvalidResponse("script exhausted".into())))
    }
}

pub fn credentials(expiration: DateTime<Utc>) -> ResolvedCredentials {
    ResolvedCredentials::new("ASIAEXAMPLE", "secret", "session", expiration)
}
