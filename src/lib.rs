//! AWS credentials from IAM Identity Center (SSO).
//!
//! The pieces, bottom-up:
//! - [`sso::DiskCache`] stores client registrations and access tokens in the
//!   directory shared with the AWS CLI
//! - [`sso::SsoAccessTokenProvider`] keeps a valid access token, running the
//!   OIDC device authorization when needed
//! - [`credentials::RoleCredentialProvider`] trades the access token for
//!   short-lived role credentials and caches them in memory

pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod sso;

pub use credentials::{ResolvedCredentials, RoleCredentialProvider};
pub use error::{AuthError, CacheError, CredentialsError, ExchangeError};
pub use sso::{AccessToken, AccessTokenProvider, ClientRegistration, DiskCache, SsoAccessTokenProvider};
