//! CLI argument parsing, validation, and startup helpers.

use std::time::Duration;

use clap::Parser;
use tracing::error;
use url::Url;

use crate::ServerConfig;
use crate::cookies::CookieSettings;
use crate::guard::{DEFAULT_AUTH_EXCHANGE_PARAM, GuardSettings};

pub const DEFAULT_LOGIN_URL: &str = "https://online.salesvault.dev/login";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Deployment environment, read from `NODE_ENV` for parity with the
/// dashboard frontend.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sessiongate",
    about = "Session gateway for the trading dashboard"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Base URL of the identity service
    #[arg(long, env = "BASE_IDENTITY_URL")]
    pub identity_url: String,

    /// External login page unauthenticated visitors are sent to
    #[arg(long, env = "LOGIN_URL", default_value = DEFAULT_LOGIN_URL)]
    pub login_url: String,

    /// Deployment environment; production sets the Secure cookie flag
    #[arg(long, env = "NODE_ENV", value_enum, default_value = "development")]
    pub node_env: Environment,

    /// Path prefixes that require a session (comma separated)
    #[arg(long, value_delimiter = ',', default_value = "/trading-view")]
    pub protected: Vec<String>,

    /// Paths that are always public (comma separated)
    #[arg(long, value_delimiter = ',', default_value = "/,/sign-in")]
    pub public: Vec<String>,

    /// Treat access tokens expiring within this many seconds as expired
    #[arg(long, default_value = "300")]
    pub expiry_buffer_secs: i64,

    /// Timeout for identity service calls, in seconds
    #[arg(long, default_value = "10")]
    pub identity_timeout_secs: u64,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Parse and validate a service URL.
/// Returns None and logs an error if validation fails.
pub fn validate_url(name: &str, value: &str) -> Option<Url> {
    let url = match Url::parse(value) {
        Ok(url) => url,
        Err(e) => {
            error!(setting = %name, value = %value, error = %e, "Invalid URL");
            return None;
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        error!(setting = %name, value = %value, "URL must use http or https");
        return None;
    }

    Some(url)
}

fn validate_paths(name: &str, paths: &[String]) -> Option<Vec<String>> {
    let paths: Vec<String> = paths
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if let Some(bad) = paths.iter().find(|p| !p.starts_with('/')) {
        error!(setting = %name, path = %bad, "Path must start with '/'");
        return None;
    }

    Some(paths)
}

/// Build ServerConfig from validated arguments.
/// Returns None and logs an error if any argument is invalid.
pub fn build_config(args: &Args) -> Option<ServerConfig> {
    let identity_url = validate_url("identity-url", &args.identity_url)?;
    let login_url = validate_url("login-url", &args.login_url)?;
    let protected_prefixes = validate_paths("protected", &args.protected)?;
    let public_paths = validate_paths("public", &args.public)?;

    if args.expiry_buffer_secs < 0 {
        error!("expiry-buffer-secs must not be negative");
        return None;
    }

    let guard = GuardSettings {
        login_url,
        protected_prefixes,
        public_paths,
        auth_exchange_param: DEFAULT_AUTH_EXCHANGE_PARAM.to_string(),
        expiry_buffer_secs: args.expiry_buffer_secs,
        cookies: CookieSettings {
            secure: args.node_env == Environment::Production,
        },
    };

    Some(ServerConfig {
        identity_url,
        identity_timeout: Duration::from_secs(args.identity_timeout_secs),
        guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["sessiongate", "--identity-url", "https://id.example.com"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.guard.login_url.as_str(), DEFAULT_LOGIN_URL);
        assert_eq!(config.guard.protected_prefixes, vec!["/trading-view"]);
        assert_eq!(config.guard.public_paths, vec!["/", "/sign-in"]);
        assert_eq!(config.guard.expiry_buffer_secs, 300);
        assert_eq!(config.identity_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_production_sets_secure_cookies() {
        let config = build_config(&parse(&["--node-env", "production"])).unwrap();
        assert!(config.guard.cookies.secure);

        let config = build_config(&parse(&["--node-env", "test"])).unwrap();
        assert!(!config.guard.cookies.secure);
    }

    #[test]
    fn test_path_lists() {
        let config = build_config(&parse(&["--protected", "/trading-view, /wallets"])).unwrap();
        assert_eq!(
            config.guard.protected_prefixes,
            vec!["/trading-view", "/wallets"]
        );

        assert!(build_config(&parse(&["--public", "sign-in"])).is_none());
    }

    #[test]
    fn test_invalid_urls_rejected() {
        assert!(build_config(&parse(&["--login-url", "not a url"])).is_none());
        assert!(validate_url("identity-url", "ftp://id.example.com").is_none());
        assert!(validate_url("identity-url", "http://localhost:5000").is_some());
    }
}
