//! SSO access token lifecycle.
//!
//! [`SsoAccessTokenProvider`] serves tokens from the [`SsoCache`] while they
//! are valid. Once they expire it renews them with the refresh token when
//! one is available, and otherwise runs the OIDC device authorization flow.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::cache::SsoCache;
use super::models::{
    AccessToken, ClientRegistration, DeviceAuthorization, RegisterClientRequest, TokenGrant,
    TokenResponse, expiry_after,
};
use super::oidc::SsoOidc;
use crate::clock::{SharedClock, system_clock};
use crate::error::{AuthError, CacheError};

/// Poll interval used when the service does not specify one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Added to the poll interval each time the service answers `slow_down`.
pub const SLOW_DOWN_DELAY: Duration = Duration::from_secs(5);

/// Client name sent when registering a new OIDC client.
pub const DEFAULT_CLIENT_NAME: &str = "sso-creds";

/// Source of valid SSO access tokens.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Return a currently valid access token, authenticating if needed.
    async fn access_token(&self) -> Result<AccessToken, AuthError>;

    /// Discard the cached access token so the next call re-authenticates.
    async fn invalidate(&self) -> Result<(), CacheError>;
}

/// Progress notifications for the interactive device authorization.
pub trait LoginCallback: Send + Sync {
    /// The user must open `authorization.display_uri()` and confirm
    /// `authorization.user_code`.
    fn token_pending(&self, authorization: &DeviceAuthorization);

    /// The device authorization completed.
    fn token_retrieved(&self) {}

    /// The device authorization failed or expired.
    fn token_retrieval_failed(&self, _error: &AuthError) {}
}

/// Reports device authorization progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingLoginCallback;

impl LoginCallback for LoggingLoginCallback {
    fn token_pending(&self, authorization: &DeviceAuthorization) {
        info!(
            user_code = %authorization.user_code,
            verification_uri = %authorization.display_uri(),
            "Open the verification URL to authorize this device"
        );
    }

    fn token_retrieved(&self) {
        info!("Device authorization complete");
    }

    fn token_retrieval_failed(&self, error: &AuthError) {
        warn!(error = %error, "Device authorization failed");
    }
}

/// Access token provider for one SSO start URL and region.
///
/// The whole load-or-authenticate sequence runs under a per-instance lock,
/// so concurrent callers share the outcome of a single network flow.
pub struct SsoAccessTokenProvider {
    start_url: String,
    region: String,
    cache: Arc<dyn SsoCache>,
    oidc: Arc<dyn SsoOidc>,
    clock: SharedClock,
    client_name: String,
    scopes: Vec<String>,
    callback: Arc<dyn LoginCallback>,
    lock: Mutex<()>,
}

impl SsoAccessTokenProvider {
    pub fn new(
        start_url: impl Into<String>,
        region: impl Into<String>,
        cache: Arc<dyn SsoCache>,
        oidc: Arc<dyn SsoOidc>,
    ) -> Self {
        Self {
            start_url: start_url.into(),
            region: region.into(),
            cache,
            oidc,
            clock: system_clock(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            scopes: Vec::new(),
            callback: Arc::new(LoggingLoginCallback),
            lock: Mutex::new(()),
        }
    }

    /// Set the clock used to stamp token expiry.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Set the name used when registering an OIDC client.
    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Set the scopes requested when registering an OIDC client.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the receiver of device authorization progress.
    pub fn with_login_callback(mut self, callback: Arc<dyn LoginCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Renew `current` with its refresh token and persist the result.
    ///
    /// `current` must belong to this provider's start URL and region, and
    /// a client registration for the region must be cached.
    #[instrument(skip(self, current), fields(start_url = %self.start_url))]
    pub async fn refresh_token(&self, current: &AccessToken) -> Result<AccessToken, AuthError> {
        if current.start_url != self.start_url || current.region != self.region {
            return Err(AuthError::InvalidRequest(format!(
                "token for {} in {} cannot be refreshed by the provider for {} in {}",
                current.start_url, current.region, self.start_url, self.region
            )));
        }

        let _guard = self.lock.lock().await;

        let refresh_token = current
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MissingRefreshToken(current.start_url.clone()))?;
        let registration = self
            .cache
            .load_client_registration(&self.region)
            .ok_or_else(|| AuthError::MissingClientRegistration(self.region.clone()))?;

        self.redeem_refresh_token(&registration, refresh_token).await
    }

    async fn redeem_refresh_token(
        &self,
        registration: &ClientRegistration,
        refresh_token: &str,
    ) -> Result<AccessToken, AuthError> {
        info!(region = %self.region, "Refreshing SSO access token");
        let response = self
            .oidc
            .create_token(registration, &TokenGrant::RefreshToken(refresh_token.to_string()))
            .await?;
        self.store_token(response)
    }

    /// Try the refresh grant on an expired cached token.
    ///
    /// `Ok(None)` means no refresh was possible or the refresh token was
    /// rejected, and the caller should fall back to the device flow.
    async fn try_refresh(&self) -> Result<Option<AccessToken>, AuthError> {
        let Some(stale) = self
            .cache
            .peek_access_token(&self.start_url)
            .filter(|t| t.can_refresh() && t.region == self.region)
        else {
            return Ok(None);
        };
        let Some(registration) = self.cache.load_client_registration(&self.region) else {
            debug!("No valid client registration for refresh");
            return Ok(None);
        };
        let Some(refresh_token) = stale.refresh_token.as_deref() else {
            return Ok(None);
        };

        match self.redeem_refresh_token(&registration, refresh_token).await {
            Ok(token) => Ok(Some(token)),
            Err(AuthError::InvalidGrant(reason)) => {
                info!(reason = %reason, "Refresh token rejected, starting device authorization");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load the region's client registration, registering a new client if
    /// there is none.
    async fn client_registration(&self) -> Result<ClientRegistration, AuthError> {
        if let Some(registration) = self.cache.load_client_registration(&self.region) {
            return Ok(registration);
        }

        info!(region = %self.region, "Registering SSO OIDC client");
        let request = RegisterClientRequest::public(&self.client_name, self.scopes.clone());
        let registration = self.oidc.register_client(&request).await?;

        if let Err(e) = self
            .cache
            .save_client_registration(&self.region, &registration)
        {
            warn!(error = %e, "Failed to persist client registration");
        }
        Ok(registration)
    }

    /// Run the device authorization grant to completion.
    async fn authorize_device(
        &self,
        registration: &ClientRegistration,
    ) -> Result<AccessToken, AuthError> {
        let response = match self
            .oidc
            .start_device_authorization(registration, &self.start_url)
            .await
        {
            Ok(r) => r,
            Err(e @ AuthError::InvalidClient(_)) => {
                warn!(region = %self.region, "Client registration rejected, discarding it");
                if let Err(ce) = self.cache.invalidate_client_registration(&self.region) {
                    warn!(error = %ce, "Failed to remove client registration");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let authorization =
            DeviceAuthorization::from_response(response, self.clock.now(), DEFAULT_POLL_INTERVAL)?;
        let lifetime = (authorization.expires_at - authorization.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = tokio::time::Instant::now()
            .checked_add(lifetime)
            .ok_or_else(|| AuthError::InvalidResponse("device authorization lifetime too long".into()))?;

        self.callback.token_pending(&authorization);

        let grant = TokenGrant::DeviceCode(authorization.device_code.clone());
        let mut interval = authorization.poll_interval;

        let result = loop {
            tokio::time::sleep(interval).await;

            match self.oidc.create_token(registration, &grant).await {
                Ok(response) => break self.store_token(response),
                Err(AuthError::AuthorizationPending) => {
                    debug!("Authorization pending");
                }
                Err(AuthError::SlowDown) => {
                    interval = interval.saturating_add(SLOW_DOWN_DELAY);
                    debug!(interval_secs = interval.as_secs(), "Slowing down polling");
                }
                Err(e) => break Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                break Err(AuthError::ExpiredToken);
            }
        };

        match &result {
            Ok(_) => self.callback.token_retrieved(),
            Err(e) => self.callback.token_retrieval_failed(e),
        }
        result
    }

    /// Build an access token from a `CreateToken` response and persist it.
    ///
    /// A failed write is logged; the token is still returned. A lifetime
    /// that is not positive or overflows is rejected before anything is saved.
    fn store_token(&self, response: TokenResponse) -> Result<AccessToken, AuthError> {
        let expires_at = expiry_after(self.clock.now(), response.expires_in)?;
        let mut token = AccessToken::new(
            self.start_url.clone(),
            self.region.clone(),
            response.access_token,
            expires_at,
        );
        token.refresh_token = response.refresh_token.filter(|t| !t.is_empty());

        if let Err(e) = self.cache.save_access_token(&self.start_url, &token) {
            warn!(error = %e, "Failed to persist access token");
        }
        Ok(token)
    }
}

#[async_trait]
impl AccessTokenProvider for SsoAccessTokenProvider {
    #[instrument(skip(self), fields(start_url = %self.start_url, region = %self.region))]
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let _guard = self.lock.lock().await;

        if let Some(token) = self.cache.load_access_token(&self.start_url) {
            debug!("Using cached access token");
            return Ok(token);
        }

        if let Some(token) = self.try_refresh().await? {
            return Ok(token);
        }

        let registration = self.client_registration().await?;
        self.authorize_device(&registration).await
    }

    #[instrument(skip(self), fields(start_url = %self.start_url))]
    async fn invalidate(&self) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        info!("Invalidating cached access token");
        self.cache.invalidate_access_token(&self.start_url)
    }
}

impl std::fmt::Debug for SsoAccessTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoAccessTokenProvider")
            .field("start_url", &self.start_url)
            .field("region", &self.region)
            .field("cache", &self.cache.name())
            .field("client_name", &self.client_name)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::sso::cache::{DiskCache, MemoryCache};
    use crate::sso::models::DeviceAuthorizationResponse;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START_URL: &str = "https://123456.awsapps.com/start";
    const REGION: &str = "us-east-1";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn token_response(access_token: &str, refresh_token: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_in: 3600,
        }
    }

    /// OIDC service with scripted answers. `create_token` answers
    /// `authorization_pending` once the script runs out.
    #[derive(Default)]
    struct ScriptedOidc {
        registrations: AtomicUsize,
        device_authorizations: AtomicUsize,
        device_error: StdMutex<Option<AuthError>>,
        device_interval: Option<i64>,
        device_expires_in: i64,
        token_results: StdMutex<VecDeque<Result<TokenResponse, AuthError>>>,
        grants: StdMutex<Vec<TokenGrant>>,
    }

    impl ScriptedOidc {
        fn new(results: Vec<Result<TokenResponse, AuthError>>) -> Self {
            Self {
                device_expires_in: 600,
                token_results: StdMutex::new(results.into()),
                ..Default::default()
            }
        }

        fn grants(&self) -> Vec<TokenGrant> {
            self.grants.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SsoOidc for ScriptedOidc {
        async fn register_client(
            &self,
            request: &RegisterClientRequest,
        ) -> Result<ClientRegistration, AuthError> {
            assert_eq!(request.client_type, "public");
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(ClientRegistration::new(
                "new-client",
                "new-secret",
                now() + chrono::Duration::days(90),
            ))
        }

        async fn start_device_authorization(
            &self,
            _registration: &ClientRegistration,
            start_url: &str,
        ) -> Result<DeviceAuthorizationResponse, AuthError> {
            assert_eq!(start_url, START_URL);
            self.device_authorizations.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.device_error.lock().unwrap().take() {
                return Err(e);
            }
            Ok(DeviceAuthorizationResponse {
                device_code: "device-code".into(),
                user_code: "ABCD-EFGH".into(),
                verification_uri: "https://device.sso.us-east-1.amazonaws.com/".into(),
                verification_uri_complete: Some(
                    "https://device.sso.us-east-1.amazonaws.com/?user_code=ABCD-EFGH".into(),
                ),
                expires_in: self.device_expires_in,
                interval: self.device_interval,
            })
        }

        async fn create_token(
            &self,
            _registration: &ClientRegistration,
            grant: &TokenGrant,
        ) -> Result<TokenResponse, AuthError> {
            self.grants.lock().unwrap().push(grant.clone());
            self.token_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(AuthError::AuthorizationPending))
        }
    }

    #[derive(Default)]
    struct RecordingCallback {
        events: StdMutex<Vec<String>>,
    }

    impl LoginCallback for RecordingCallback {
        fn token_pending(&self, authorization: &DeviceAuthorization) {
            self.events
                .lock()
                .unwrap()
                .push(format!("pending:{}", authorization.user_code));
        }

        fn token_retrieved(&self) {
            self.events.lock().unwrap().push("retrieved".into());
        }

        fn token_retrieval_failed(&self, _error: &AuthError) {
            self.events.lock().unwrap().push("failed".into());
        }
    }

    struct Fixture {
        cache: MemoryCache,
        oidc: Arc<ScriptedOidc>,
        callback: Arc<RecordingCallback>,
        provider: SsoAccessTokenProvider,
    }

    fn fixture(oidc: ScriptedOidc) -> Fixture {
        let clock: SharedClock = Arc::new(FixedClock::new(now()));
        let cache = MemoryCache::with_clock(clock.clone());
        let oidc = Arc::new(oidc);
        let callback = Arc::new(RecordingCallback::default());
        let provider = SsoAccessTokenProvider::new(
            START_URL,
            REGION,
            Arc::new(cache.clone()),
            oidc.clone(),
        )
        .with_clock(clock)
        .with_login_callback(callback.clone());
        Fixture {
            cache,
            oidc,
            callback,
            provider,
        }
    }

    fn seed_registration(cache: &MemoryCache) -> ClientRegistration {
        let registration =
            ClientRegistration::new("cached-client", "cached-secret", now() + chrono::Duration::days(1));
        cache.save_client_registration(REGION, &registration).unwrap();
        registration
    }

    #[tokio::test]
    async fn test_valid_cached_token_skips_network() {
        let f = fixture(ScriptedOidc::new(vec![]));
        let cached = AccessToken::new(START_URL, REGION, "cached", now() + chrono::Duration::minutes(10));
        f.cache.save_access_token(START_URL, &cached).unwrap();

        let token = f.provider.access_token().await.unwrap();

        assert_eq!(token, cached);
        assert_eq!(f.oidc.registrations.load(Ordering::SeqCst), 0);
        assert_eq!(f.oidc.device_authorizations.load(Ordering::SeqCst), 0);
        assert!(f.oidc.grants().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_flow_with_cached_registration() {
        let f = fixture(ScriptedOidc::new(vec![Ok(token_response("fresh", Some("rt")))]));
        seed_registration(&f.cache);

        let token = f.provider.access_token().await.unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(token.start_url, START_URL);
        assert_eq!(token.region, REGION);
        assert_eq!(token.expires_at, now() + chrono::Duration::seconds(3600));
        assert_eq!(token.refresh_token.as_deref(), Some("rt"));
        assert_eq!(f.cache.load_access_token(START_URL), Some(token));
        assert_eq!(f.oidc.registrations.load(Ordering::SeqCst), 0);
        assert_eq!(f.oidc.grants(), vec![TokenGrant::DeviceCode("device-code".into())]);
        assert_eq!(
            *f.callback.events.lock().unwrap(),
            vec!["pending:ABCD-EFGH".to_string(), "retrieved".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_registration_is_registered_and_saved() {
        let f = fixture(ScriptedOidc::new(vec![Ok(token_response("fresh", None))]));

        f.provider.access_token().await.unwrap();

        assert_eq!(f.oidc.registrations.load(Ordering::SeqCst), 1);
        let saved = f.cache.load_client_registration(REGION).unwrap();
        assert_eq!(saved.client_id, "new-client");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_honours_pending_and_slow_down() {
        let mut oidc = ScriptedOidc::new(vec![
            Err(AuthError::AuthorizationPending),
            Err(AuthError::SlowDown),
            Ok(token_response("fresh", None)),
        ]);
        oidc.device_interval = Some(2);
        let f = fixture(oidc);
        seed_registration(&f.cache);

        let started = tokio::time::Instant::now();
        f.provider.access_token().await.unwrap();
        let elapsed = started.elapsed();

        // 2s, 2s, then 2s + 5s after slow_down.
        assert!(elapsed >= Duration::from_secs(11), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(12), "elapsed {elapsed:?}");
        assert_eq!(f.oidc.grants().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_authorization_expires() {
        let mut oidc = ScriptedOidc::new(vec![]);
        oidc.device_expires_in = 12;
        let f = fixture(oidc);
        seed_registration(&f.cache);

        let err = f.provider.access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::ExpiredToken));
        assert_eq!(f.oidc.grants().len(), 3);
        assert!(f.cache.peek_access_token(START_URL).is_none());
        assert_eq!(
            f.callback.events.lock().unwrap().last().map(String::as_str),
            Some("failed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_poll_error_propagates() {
        let f = fixture(ScriptedOidc::new(vec![Err(AuthError::AccessDenied("denied".into()))]));
        seed_registration(&f.cache);

        let err = f.provider.access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::AccessDenied(_)));
        assert!(f.cache.peek_access_token(START_URL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_client_discards_registration() {
        let f = fixture(ScriptedOidc::new(vec![]));
        *f.oidc.device_error.lock().unwrap() = Some(AuthError::InvalidClient("expired".into()));
        seed_registration(&f.cache);

        let err = f.provider.access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidClient(_)));
        assert!(f.cache.load_client_registration(REGION).is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let f = fixture(ScriptedOidc::new(vec![Ok(token_response("renewed", Some("rt-2")))]));
        seed_registration(&f.cache);
        let stale = AccessToken::new(START_URL, REGION, "stale", now() - chrono::Duration::minutes(1))
            .with_refresh_token("rt-1");
        f.cache.save_access_token(START_URL, &stale).unwrap();

        let token = f.provider.access_token().await.unwrap();

        assert_eq!(token.access_token, "renewed");
        assert_eq!(token.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(f.oidc.grants(), vec![TokenGrant::RefreshToken("rt-1".into())]);
        assert_eq!(f.oidc.device_authorizations.load(Ordering::SeqCst), 0);
        assert!(f.callback.events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_refresh_falls_back_to_device_flow() {
        let f = fixture(ScriptedOidc::new(vec![
            Err(AuthError::InvalidGrant("revoked".into())),
            Ok(token_response("fresh", None)),
        ]));
        seed_registration(&f.cache);
        let stale = AccessToken::new(START_URL, REGION, "stale", now() - chrono::Duration::minutes(1))
            .with_refresh_token("rt-1");
        f.cache.save_access_token(START_URL, &stale).unwrap();

        let token = f.provider.access_token().await.unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(token.refresh_token, None);
        assert_eq!(
            f.oidc.grants(),
            vec![
                TokenGrant::RefreshToken("rt-1".into()),
                TokenGrant::DeviceCode("device-code".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_service_error_propagates() {
        let f = fixture(ScriptedOidc::new(vec![Err(AuthError::Service {
            status: 500,
            message: "boom".into(),
        })]));
        seed_registration(&f.cache);
        let stale = AccessToken::new(START_URL, REGION, "stale", now() - chrono::Duration::minutes(1))
            .with_refresh_token("rt-1");
        f.cache.save_access_token(START_URL, &stale).unwrap();

        let err = f.provider.access_token().await.unwrap_err();

        assert!(matches!(err, AuthError::Service { status: 500, .. }));
        assert_eq!(f.oidc.device_authorizations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_token_requires_refresh_token() {
        let f = fixture(ScriptedOidc::new(vec![]));
        seed_registration(&f.cache);
        let token = AccessToken::new(START_URL, REGION, "t", now());

        let err = f.provider.refresh_token(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingRefreshToken(url) if url == START_URL));
    }

    #[tokio::test]
    async fn test_refresh_token_requires_registration() {
        let f = fixture(ScriptedOidc::new(vec![]));
        let token = AccessToken::new(START_URL, REGION, "t", now()).with_refresh_token("rt");

        let err = f.provider.refresh_token(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingClientRegistration(r) if r == REGION));
    }

    #[tokio::test]
    async fn test_refresh_token_rejects_token_for_other_session() {
        let f = fixture(ScriptedOidc::new(vec![Ok(token_response("renewed", None))]));
        seed_registration(&f.cache);
        let other_url = AccessToken::new("https://other.awsapps.com/start", REGION, "t", now())
            .with_refresh_token("rt");
        let other_region = AccessToken::new(START_URL, "eu-west-1", "t", now())
            .with_refresh_token("rt");

        for token in [other_url, other_region] {
            let err = f.provider.refresh_token(&token).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidRequest(_)), "{err:?}");
        }
        assert!(f.oidc.grants().is_empty());
        assert!(f.cache.peek_access_token(START_URL).is_none());
    }

    #[tokio::test]
    async fn test_refresh_with_unusable_lifetime_saves_nothing() {
        for expires_in in [0, -60, i64::MAX] {
            let mut response = token_response("renewed", Some("rt-2"));
            response.expires_in = expires_in;
            let f = fixture(ScriptedOidc::new(vec![Ok(response)]));
            seed_registration(&f.cache);
            let current = AccessToken::new(START_URL, REGION, "stale", now())
                .with_refresh_token("rt-1");

            let err = f.provider.refresh_token(&current).await.unwrap_err();

            assert!(matches!(err, AuthError::InvalidResponse(_)), "expires_in = {expires_in}");
            assert!(f.cache.peek_access_token(START_URL).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_flow_token_with_unusable_lifetime_fails() {
        for expires_in in [0, -60, i64::MAX] {
            let mut response = token_response("fresh", None);
            response.expires_in = expires_in;
            let f = fixture(ScriptedOidc::new(vec![Ok(response)]));
            seed_registration(&f.cache);

            let err = f.provider.access_token().await.unwrap_err();

            assert!(matches!(err, AuthError::InvalidResponse(_)), "expires_in = {expires_in}");
            assert!(f.cache.peek_access_token(START_URL).is_none());
            assert_eq!(
                f.callback.events.lock().unwrap().last().map(String::as_str),
                Some("failed")
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_authorization_with_unusable_lifetime_fails() {
        for expires_in in [0, -60, i64::MAX] {
            let mut oidc = ScriptedOidc::new(vec![Ok(token_response("fresh", None))]);
            oidc.device_expires_in = expires_in;
            let f = fixture(oidc);
            seed_registration(&f.cache);

            let err = f.provider.access_token().await.unwrap_err();

            assert!(matches!(err, AuthError::InvalidResponse(_)), "expires_in = {expires_in}");
            assert!(f.oidc.grants().is_empty());
            assert!(f.cache.peek_access_token(START_URL).is_none());
        }
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_flow() {
        let f = fixture(ScriptedOidc::new(vec![]));
        let cached = AccessToken::new(START_URL, REGION, "cached", now() + chrono::Duration::minutes(10));
        f.cache.save_access_token(START_URL, &cached).unwrap();

        f.provider.invalidate().await.unwrap();

        assert!(f.cache.peek_access_token(START_URL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_flow() {
        let f = fixture(ScriptedOidc::new(vec![Ok(token_response("fresh", None))]));
        seed_registration(&f.cache);
        let provider = Arc::new(f.provider);

        let a = tokio::spawn({
            let provider = provider.clone();
            async move { provider.access_token().await }
        });
        let b = tokio::spawn({
            let provider = provider.clone();
            async move { provider.access_token().await }
        });

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(a, b);
        assert_eq!(f.oidc.device_authorizations.load(Ordering::SeqCst), 1);
        assert_eq!(f.oidc.grants().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failure_still_returns_token() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let clock: SharedClock = Arc::new(FixedClock::new(now()));
        let oidc = Arc::new(ScriptedOidc::new(vec![Ok(token_response("fresh", None))]));
        let provider = SsoAccessTokenProvider::new(
            START_URL,
            REGION,
            Arc::new(DiskCache::with_clock(blocker.join("cache"), clock.clone())),
            oidc.clone(),
        )
        .with_clock(clock);

        let token = provider.access_token().await.unwrap();
        assert_eq!(token.access_token, "fresh");
        assert_eq!(oidc.registrations.load(Ordering::SeqCst), 1);
    }
}
