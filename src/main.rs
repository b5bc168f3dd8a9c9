//! sso-creds -- AWS `credential_process` backed by IAM Identity Center.
//!
//! Resolves role credentials for the configured account and role and prints
//! them as a `credential_process` document on stdout. Logs and login
//! prompts go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sso_creds::config::Config;
use sso_creds::credentials::exchange::portal_endpoint;
use sso_creds::credentials::{HttpRoleCredentialExchange, RoleCredentialProvider};
use sso_creds::sso::models::DeviceAuthorization;
use sso_creds::sso::oidc::oidc_endpoint;
use sso_creds::sso::{
    DiskCache, HttpSsoOidcClient, LoginCallback, SsoAccessTokenProvider, SsoCache,
};
use sso_creds::AuthError;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: Option<PathBuf>,
    account_id: Option<String>,
    role_name: Option<String>,
    logout: bool,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut cli = CliArgs {
        config_path: None,
        account_id: None,
        role_name: None,
        logout: false,
    };

    fn value(flag: &str, next: Option<String>) -> String {
        next.unwrap_or_else(|| {
            eprintln!("Error: {flag} requires an argument");
            std::process::exit(1);
        })
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => cli.config_path = Some(PathBuf::from(value(&arg, args.next()))),
            "--account-id" => cli.account_id = Some(value(&arg, args.next())),
            "--role-name" => cli.role_name = Some(value(&arg, args.next())),
            "--logout" => cli.logout = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("sso-creds {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    cli
}

fn print_usage() {
    println!(
        "\
sso-creds {version} -- AWS credential_process for IAM Identity Center

USAGE:
    sso-creds [OPTIONS]

OPTIONS:
    -c, --config <PATH>      Path to configuration file [default: {default}]
        --account-id <ID>    AWS account to get credentials for
        --role-name <NAME>   Role to assume in that account
        --logout             Remove the cached SSO access token and exit
    -h, --help               Print this help message
    -V, --version            Print version information

ENVIRONMENT:
    RUST_LOG                 Override log level (e.g. RUST_LOG=debug)
    SSO_CREDS_CONFIG         Alternative to --config flag
    SSO_CREDS_*              Override individual settings
",
        version = env!("CARGO_PKG_VERSION"),
        default = Config::default_path().display(),
    );
}

// ---------------------------------------------------------------------------
// Device authorization prompt
// ---------------------------------------------------------------------------

/// Tells the user on stderr where to approve the login.
struct TerminalLoginCallback;

impl LoginCallback for TerminalLoginCallback {
    fn token_pending(&self, authorization: &DeviceAuthorization) {
        eprintln!(
            "To sign in, open:\n\n    {}\n\nand confirm the code: {}\n",
            authorization.display_uri(),
            authorization.user_code
        );
    }

    fn token_retrieved(&self) {
        eprintln!("Successfully signed in.");
    }

    fn token_retrieval_failed(&self, error: &AuthError) {
        eprintln!("Sign-in failed: {error}");
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let cli = parse_args();

    let config_path = cli
        .config_path
        .or_else(|| std::env::var("SSO_CREDS_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(Config::default_path);

    let mut config = Config::load(&config_path)?;
    if let Some(account_id) = cli.account_id {
        config.sso.account_id = Some(account_id);
    }
    if let Some(role_name) = cli.role_name {
        config.sso.role_name = Some(role_name);
    }

    init_tracing(&config);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting sso-creds"
    );

    let cache_dir = config.cache.effective_dir().ok_or_else(|| {
        anyhow::anyhow!("Cannot determine the home directory; set cache.dir or SSO_CREDS_CACHE_DIR")
    })?;
    let cache = Arc::new(DiskCache::new(cache_dir));

    if cli.logout {
        let start_url = config
            .sso
            .start_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Missing required setting: sso.start_url"))?;
        cache.invalidate_access_token(start_url)?;
        eprintln!("Removed cached SSO access token for {start_url}");
        return Ok(());
    }

    config.validate()?;
    let (Some(start_url), Some(region), Some(account_id), Some(role_name)) = (
        config.sso.start_url.clone(),
        config.sso.region.clone(),
        config.sso.account_id.clone(),
        config.sso.role_name.clone(),
    ) else {
        anyhow::bail!("Incomplete SSO configuration");
    };

    let timeout = config.http.timeout();
    let oidc_url = config
        .http
        .oidc_endpoint
        .clone()
        .unwrap_or_else(|| oidc_endpoint(&region));
    let portal_url = config
        .http
        .portal_endpoint
        .clone()
        .unwrap_or_else(|| portal_endpoint(&region));
    let oidc = HttpSsoOidcClient::with_endpoint(oidc_url, timeout)?;
    let exchange = HttpRoleCredentialExchange::with_endpoint(portal_url, timeout)?;

    let tokens = SsoAccessTokenProvider::new(start_url, region, cache, Arc::new(oidc))
        .with_client_name(config.sso.client_name.clone())
        .with_scopes(config.sso.scopes.clone())
        .with_login_callback(Arc::new(TerminalLoginCallback));

    let provider =
        RoleCredentialProvider::new(account_id, role_name, Arc::new(tokens), Arc::new(exchange));

    let credentials = provider.resolve_credentials().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&credentials.to_process_output())?
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("sso_creds={level},warn"))
    });

    // stdout carries the credential document
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
