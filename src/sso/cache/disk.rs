//! File-based SSO cache.

use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, warn};

use super::SsoCache;
use crate::clock::{SharedClock, system_clock};
use crate::error::CacheError;
use crate::sso::models::{AccessToken, ClientRegistration};

/// File name prefix for client registration files:
/// `{dir}/{CLIENT_REGISTRATION_PREFIX}-{region}.json`.
pub const CLIENT_REGISTRATION_PREFIX: &str = "sso-creds";

/// File permissions for cache files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache key for an access token: lowercase hex SHA-1 of the start URL.
///
/// This is the same naming the AWS CLI uses under `~/.aws/sso/cache`, and it
/// keeps the URL itself out of the file name.
pub fn access_token_cache_key(start_url: &str) -> String {
    hex::encode(Sha1::digest(start_url.as_bytes()))
}

/// File-based SSO cache.
///
/// Stores each entry as its own JSON file in a configurable directory.
/// Expiry is judged against the injected clock at read time; expired files
/// are left in place and reported as absent.
///
/// # Security
/// - Files are created with 0600 permissions on Unix
/// - The directory is created with 0700 permissions
/// - Writes go to a temp file that is renamed over the target
#[derive(Clone)]
pub struct DiskCache {
    dir: PathBuf,
    clock: SharedClock,
}

impl DiskCache {
    /// Create a cache in `dir` using the system clock.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, system_clock())
    }

    /// Create a cache in `dir` judging expiry against `clock`.
    pub fn with_clock(dir: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    /// The shared SSO cache directory, `~/.aws/sso/cache`.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".aws").join("sso").join("cache"))
    }

    /// Directory holding the cache files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the client registration file for `region`.
    pub fn client_registration_path(&self, region: &str) -> Result<PathBuf, CacheError> {
        if region.is_empty()
            || !region
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CacheError::InvalidKey(region.to_string()));
        }
        Ok(self
            .dir
            .join(format!("{CLIENT_REGISTRATION_PREFIX}-{region}.json")))
    }

    /// Path of the access token file for `start_url`.
    pub fn access_token_path(&self, start_url: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", access_token_cache_key(start_url)))
    }

    /// Read and decode a cache file. Every failure is a miss.
    fn read_entry<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Cache file not found");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache file");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unparsable cache file");
                None
            }
        }
    }

    /// Ensure the cache directory exists with correct permissions.
    fn ensure_dir(&self) -> Result<(), CacheError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(DIR_MODE);
                std::fs::set_permissions(&self.dir, perms)
                    .map_err(|e| CacheError::io(&self.dir, e))?;
            }
        }
        Ok(())
    }

    /// Encode `entry` and atomically replace `path` with it.
    fn write_entry<T: serde::Serialize>(&self, path: &Path, entry: &T) -> Result<(), CacheError> {
        self.ensure_dir()?;

        let content = serde_json::to_string_pretty(entry)?;
        let temp_path = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| CacheError::io(&temp_path, e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| CacheError::io(&temp_path, e))?;
            file.sync_all().map_err(|e| CacheError::io(&temp_path, e))?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, &content).map_err(|e| CacheError::io(&temp_path, e))?;
        }

        if let Err(e) = std::fs::rename(&temp_path, path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(CacheError::io(path, e));
        }

        debug!(path = %path.display(), "Cache entry written");
        Ok(())
    }

    fn remove_entry(path: &Path) -> Result<(), CacheError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Cache entry removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }
}

impl SsoCache for DiskCache {
    #[instrument(skip(self))]
    fn load_client_registration(&self, region: &str) -> Option<ClientRegistration> {
        let path = match self.client_registration_path(region) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Refusing to load client registration");
                return None;
            }
        };
        let registration: ClientRegistration = Self::read_entry(&path)?;
        if registration.is_expired_at(self.clock.now()) {
            debug!("Cached client registration has expired");
            return None;
        }
        Some(registration)
    }

    #[instrument(skip(self, registration))]
    fn save_client_registration(
        &self,
        region: &str,
        registration: &ClientRegistration,
    ) -> Result<(), CacheError> {
        let path = self.client_registration_path(region)?;
        self.write_entry(&path, registration)
    }

    #[instrument(skip(self))]
    fn invalidate_client_registration(&self, region: &str) -> Result<(), CacheError> {
        let path = self.client_registration_path(region)?;
        Self::remove_entry(&path)
    }

    #[instrument(skip(self))]
    fn load_access_token(&self, start_url: &str) -> Option<AccessToken> {
        let token = self.peek_access_token(start_url)?;
        if token.is_expired_at(self.clock.now()) {
            debug!("Cached access token has expired");
            return None;
        }
        Some(token)
    }

    #[instrument(skip(self))]
    fn peek_access_token(&self, start_url: &str) -> Option<AccessToken> {
        Self::read_entry(&self.access_token_path(start_url))
    }

    #[instrument(skip(self, token))]
    fn save_access_token(&self, start_url: &str, token: &AccessToken) -> Result<(), CacheError> {
        self.write_entry(&self.access_token_path(start_url), token)
    }

    #[instrument(skip(self))]
    fn invalidate_access_token(&self, start_url: &str) -> Result<(), CacheError> {
        Self::remove_entry(&self.access_token_path(start_url))
    }

    fn name(&self) -> &str {
        "disk"
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .finish()
    }
}
