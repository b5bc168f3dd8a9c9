//! Role credential types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::sso::timestamp::{format_instant, iso_instant};

/// Version of the `credential_process` document format.
pub const PROCESS_OUTPUT_VERSION: u32 = 1;

/// Short-lived AWS credentials for one account and role.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl ResolvedCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expiration,
        }
    }

    /// Credentials are usable strictly before their expiration.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }

    /// The document the AWS CLI expects from a `credential_process`.
    pub fn to_process_output(&self) -> ProcessCredentials<'_> {
        ProcessCredentials {
            version: PROCESS_OUTPUT_VERSION,
            access_key_id: &self.access_key_id,
            secret_access_key: &self.secret_access_key,
            session_token: &self.session_token,
            expiration: self.expiration,
        }
    }
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &format_instant(&self.expiration))
            .finish()
    }
}

/// `credential_process` output, serialized with PascalCase keys.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessCredentials<'a> {
    pub version: u32,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: &'a str,
    #[serde(with = "iso_instant")]
    pub expiration: DateTime<Utc>,
}
