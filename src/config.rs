use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sso::DiskCache;
use crate::sso::access_token::DEFAULT_CLIENT_NAME;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "sso.region") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sso: SsoConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Which SSO instance, account and role to resolve credentials for.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SsoConfig {
    /// SSO start URL, e.g. `https://my-org.awsapps.com/start`.
    #[serde(default)]
    pub start_url: Option<String>,
    /// Region of the IAM Identity Center instance.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub role_name: Option<String>,
    /// Scopes requested when registering the OIDC client.
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            start_url: None,
            region: None,
            account_id: None,
            role_name: None,
            scopes: Vec::new(),
            client_name: default_client_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache directory; `~/.aws/sso/cache` when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// The configured directory, or the shared AWS SSO cache directory.
    pub fn effective_dir(&self) -> Option<PathBuf> {
        self.dir.clone().or_else(DiskCache::default_dir)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Replaces `https://oidc.{region}.amazonaws.com`.
    #[serde(default)]
    pub oidc_endpoint: Option<String>,
    /// Replaces `https://portal.sso.{region}.amazonaws.com`.
    #[serde(default)]
    pub portal_endpoint: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            oidc_endpoint: None,
            portal_endpoint: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_client_name() -> String {
    DEFAULT_CLIENT_NAME.to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loading, env overrides and validation
// ---------------------------------------------------------------------------

/// Settings that must be known before credentials can be resolved, with the
/// env var that can supply each one.
const REQUIRED_SETTINGS: [(&str, &str); 4] = [
    ("sso.start_url", "SSO_CREDS_START_URL"),
    ("sso.region", "SSO_CREDS_REGION"),
    ("sso.account_id", "SSO_CREDS_ACCOUNT_ID"),
    ("sso.role_name", "SSO_CREDS_ROLE_NAME"),
];

impl Config {
    /// Default config file location, `<config dir>/sso-creds/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sso-creds")
            .join("config.toml")
    }

    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `SSO_CREDS_` takes precedence
    /// over the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check that every required SSO setting is present.
    pub fn validate(&self) -> anyhow::Result<()> {
        let missing: Vec<String> = REQUIRED_SETTINGS
            .iter()
            .filter(|(key, _)| self.value_of(key).is_none_or(str::is_empty))
            .map(|(key, env)| format!("{key} ({env})"))
            .collect();

        if !missing.is_empty() {
            anyhow::bail!("Missing required settings: {}", missing.join(", "));
        }
        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    fn value_of(&self, key: &str) -> Option<&str> {
        match key {
            "sso.start_url" => self.sso.start_url.as_deref(),
            "sso.region" => self.sso.region.as_deref(),
            "sso.account_id" => self.sso.account_id.as_deref(),
            "sso.role_name" => self.sso.role_name.as_deref(),
            _ => None,
        }
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        // -- Helpers (macros for concise per-field overrides) --

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }

        // -- SSO --
        env_opt_str!("sso.start_url", "SSO_CREDS_START_URL", self.sso.start_url);
        env_opt_str!("sso.region", "SSO_CREDS_REGION", self.sso.region);
        env_opt_str!("sso.account_id", "SSO_CREDS_ACCOUNT_ID", self.sso.account_id);
        env_opt_str!("sso.role_name", "SSO_CREDS_ROLE_NAME", self.sso.role_name);
        env_str!("sso.client_name", "SSO_CREDS_CLIENT_NAME", self.sso.client_name);
        if let Ok(val) = std::env::var("SSO_CREDS_SCOPES") {
            self.sso.scopes = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("sso.scopes", "SSO_CREDS_SCOPES");
        }

        // -- Cache --
        if let Ok(val) = std::env::var("SSO_CREDS_CACHE_DIR") {
            self.cache.dir = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
            ov.record("cache.dir", "SSO_CREDS_CACHE_DIR");
        }

        // -- HTTP --
        env_parse!("http.timeout_secs", "SSO_CREDS_HTTP_TIMEOUT_SECS", self.http.timeout_secs);
        env_opt_str!("http.oidc_endpoint", "SSO_CREDS_OIDC_ENDPOINT", self.http.oidc_endpoint);
        env_opt_str!("http.portal_endpoint", "SSO_CREDS_PORTAL_ENDPOINT", self.http.portal_endpoint);

        // -- Logging --
        env_str!("logging.level", "SSO_CREDS_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "SSO_CREDS_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Env vars are process-global; tests touching them take this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn complete() -> Config {
        let mut config = Config::default();
        config.sso.start_url = Some("https://example.awsapps.com/start".into());
        config.sso.region = Some("us-east-1".into());
        config.sso.account_id = Some("111122223333".into());
        config.sso.role_name = Some("ReadOnly".into());
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.sso.start_url.is_none());
        assert_eq!(config.sso.client_name, "sso-creds");
        assert!(config.sso.scopes.is_empty());
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_validate_lists_missing_settings() {
        let mut config = Config::default();
        config.sso.region = Some("us-east-1".into());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sso.start_url (SSO_CREDS_START_URL)"));
        assert!(err.contains("sso.account_id"));
        assert!(err.contains("sso.role_name"));
        assert!(!err.contains("sso.region"));
    }

    #[test]
    fn test_validate_complete_config() {
        assert!(complete().validate().is_ok());

        let mut zero_timeout = complete();
        zero_timeout.http.timeout_secs = 0;
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_cache_dir_falls_back_to_aws_location() {
        let explicit = CacheConfig {
            dir: Some(PathBuf::from("/tmp/sso-cache")),
        };
        assert_eq!(explicit.effective_dir(), Some(PathBuf::from("/tmp/sso-cache")));

        if let Some(dir) = CacheConfig::default().effective_dir() {
            assert!(dir.ends_with(".aws/sso/cache"));
        }
    }

    #[test]
    fn test_config_load_missing_file() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let config = Config::load(Path::new("/nonexistent/sso-creds.toml")).unwrap();
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[test]
    fn test_config_load_from_file() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[sso]
start_url = "https://example.awsapps.com/start"
region = "eu-west-1"
account_id = "111122223333"
role_name = "Admin"
scopes = ["sso:account:access"]

[cache]
dir = "/var/cache/sso"

[http]
timeout_secs = 10

[logging]
level = "debug"
json = true
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sso.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.sso.role_name.as_deref(), Some("Admin"));
        assert_eq!(config.sso.scopes, vec!["sso:account:access".to_string()]);
        assert_eq!(config.sso.client_name, "sso-creds");
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/sso")));
        assert_eq!(config.http.timeout_secs, 10);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_applies() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: serialized by ENV_LOCK.
        unsafe {
            std::env::set_var("SSO_CREDS_REGION", "ap-southeast-2");
            std::env::set_var("SSO_CREDS_HTTP_TIMEOUT_SECS", "5");
            std::env::set_var("SSO_CREDS_SCOPES", "a, b,,c");
            std::env::set_var("SSO_CREDS_LOG_JSON", "yes");
        }

        let config = Config::load(Path::new("/nonexistent/sso-creds.toml")).unwrap();

        unsafe {
            std::env::remove_var("SSO_CREDS_REGION");
            std::env::remove_var("SSO_CREDS_HTTP_TIMEOUT_SECS");
            std::env::remove_var("SSO_CREDS_SCOPES");
            std::env::remove_var("SSO_CREDS_LOG_JSON");
        }

        assert_eq!(config.sso.region.as_deref(), Some("ap-southeast-2"));
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.sso.scopes, vec!["a", "b", "c"]);
        assert!(config.logging.json);
        assert!(config.env_overrides.is_overridden("sso.region"));
        assert_eq!(
            config.env_overrides.env_var_for("http.timeout_secs"),
            Some("SSO_CREDS_HTTP_TIMEOUT_SECS")
        );
        assert!(!config.env_overrides.is_overridden("sso.start_url"));
    }

    #[test]
    fn test_unparsable_env_value_is_ignored() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { std::env::set_var("SSO_CREDS_HTTP_TIMEOUT_SECS", "soon") };

        let config = Config::load(Path::new("/nonexistent/sso-creds.toml")).unwrap();

        unsafe { std::env::remove_var("SSO_CREDS_HTTP_TIMEOUT_SECS") };

        assert_eq!(config.http.timeout_secs, 30);
        assert!(!config.env_overrides.is_overridden("http.timeout_secs"));
    }

    #[test]
    fn test_empty_env_clears_optional_setting() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[sso]\nrole_name = \"Admin\"\n").unwrap();
        unsafe { std::env::set_var("SSO_CREDS_ROLE_NAME", "") };

        let config = Config::load(file.path()).unwrap();

        unsafe { std::env::remove_var("SSO_CREDS_ROLE_NAME") };

        assert!(config.sso.role_name.is_none());
        assert!(config.env_overrides.is_overridden("sso.role_name"));
    }
}
