//! AWS role credentials obtained with an SSO access token.

pub mod exchange;
pub mod models;
pub mod provider;

pub use exchange::{HttpRoleCredentialExchange, RoleCredentialExchange};
pub use models::{ProcessCredentials, ResolvedCredentials};
pub use provider::RoleCredentialProvider;
