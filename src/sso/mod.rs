//! AWS IAM Identity Center (SSO) access tokens.
//!
//! - [`cache`]: on-disk storage shared with the AWS CLI
//! - [`oidc`]: the OIDC service client
//! - [`access_token`]: the provider tying both together

pub mod access_token;
pub mod cache;
pub mod models;
pub mod oidc;
pub mod timestamp;

pub use access_token::{
    AccessTokenProvider, LoggingLoginCallback, LoginCallback, SsoAccessTokenProvider,
};
pub use cache::{DiskCache, MemoryCache, SsoCache};
pub use models::{AccessToken, ClientRegistration, DeviceAuthorization};
pub use oidc::{HttpSsoOidcClient, SsoOidc};
