use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

use crate::auth::AuthFlow;

pub const DEFAULT_REDIRECT_HOST: &str = "127.0.0.1";
pub const DEFAULT_REDIRECT_PORT: u16 = 3456;

const PRODUCTION_CLIENT_ID: &str = "fbdb2649-e327-4907-8f67-908d24cfd7e3";
const DEVELOPMENT_CLIENT_ID: &str = "e5380e02-312a-7408-5718-e07017e9cf52";

/// Service environment the identity provider and backend APIs run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Production,
    Local,
    Spin { fqdn: String },
}

impl Environment {
    /// Domain appended to bare store names.
    pub fn shop_domain(&self) -> String {
        match self {
            Environment::Production => "myshopify.com".to_owned(),
            Environment::Local => "shop.dev".to_owned(),
            Environment::Spin { fqdn } => format!("shopify.{fqdn}"),
        }
    }

    fn identity_host(&self) -> String {
        match self {
            Environment::Production => "accounts.shopify.com".to_owned(),
            Environment::Local => "identity.shop.dev".to_owned(),
            Environment::Spin { fqdn } => format!("identity.{fqdn}"),
        }
    }

    fn partners_host(&self) -> String {
        match self {
            Environment::Production => "partners.shopify.com".to_owned(),
            Environment::Local => "partners.shop.dev".to_owned(),
            Environment::Spin { fqdn } => format!("partners.{fqdn}"),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Local => write!(f, "local"),
            Environment::Spin { fqdn } => write!(f, "spin ({fqdn})"),
        }
    }
}

/// Settings threaded through every authentication component.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub environment: Environment,
    /// Base URL of the identity provider. Its host (and port) keys the session map.
    pub identity_url: Url,
    pub partners_url: Url,
    pub redirect_host: String,
    pub redirect_port: u16,
    /// Tokens expiring within this window are refreshed ahead of time.
    pub refresh_margin: Duration,
    /// Delay before the browser flow prints a manual fallback link.
    pub fallback_link_delay: StdDuration,
    pub flow: AuthFlow,
    pub first_party_dev: bool,
    /// Partners access token supplied by the environment, bypassing interactive login.
    pub partners_token: Option<String>,
    pub ci: bool,
    pub cloud_environment: bool,
}

impl AuthConfig {
    pub fn for_environment(environment: Environment) -> Result<Self, ConfigError> {
        let identity_url = Url::parse(&format!("https://{}", environment.identity_host()))?;
        let partners_url = Url::parse(&format!("https://{}", environment.partners_host()))?;
        Ok(Self {
            environment,
            identity_url,
            partners_url,
            redirect_host: DEFAULT_REDIRECT_HOST.to_owned(),
            redirect_port: DEFAULT_REDIRECT_PORT,
            refresh_margin: Duration::minutes(5),
            fallback_link_delay: StdDuration::from_secs(10),
            flow: AuthFlow::Browser,
            first_party_dev: false,
            partners_token: None,
            ci: false,
            cloud_environment: false,
        })
    }

    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match non_empty_var("SHOPCLI_SERVICE_ENV") {
            None => Environment::Production,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "production" => Environment::Production,
                "local" => Environment::Local,
                "spin" => Environment::Spin {
                    fqdn: non_empty_var("SHOPCLI_SPIN_FQDN").ok_or(ConfigError::MissingSpinFqdn)?,
                },
                other => return Err(ConfigError::UnknownEnvironment(other.to_owned())),
            },
        };

        let mut config = Self::for_environment(environment)?;
        if let Some(url) = non_empty_var("SHOPCLI_IDENTITY_URL") {
            config.identity_url = Url::parse(&url)?;
        }
        if let Some(url) = non_empty_var("SHOPCLI_PARTNERS_URL") {
            config.partners_url = Url::parse(&url)?;
        }
        config.cloud_environment =
            env::var_os("CODESPACES").is_some() || env::var_os("GITPOD_WORKSPACE_URL").is_some();
        config.flow = AuthFlow::detect(config.cloud_environment);
        config.first_party_dev = truthy_var("SHOPCLI_FIRST_PARTY_DEV");
        config.partners_token = non_empty_var("SHOPCLI_PARTNERS_TOKEN");
        config.ci = truthy_var("CI");
        Ok(config)
    }

    pub fn with_identity_url(mut self, url: Url) -> Self {
        self.identity_url = url;
        self
    }

    pub fn with_partners_url(mut self, url: Url) -> Self {
        self.partners_url = url;
        self
    }

    pub fn with_flow(mut self, flow: AuthFlow) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_redirect_port(mut self, port: u16) -> Self {
        self.redirect_port = port;
        self
    }

    pub fn with_fallback_link_delay(mut self, delay: StdDuration) -> Self {
        self.fallback_link_delay = delay;
        self
    }

    pub fn with_partners_token(mut self, token: impl Into<String>) -> Self {
        self.partners_token = Some(token.into());
        self
    }

    /// Identity provider fqdn used as the top-level session key.
    pub fn identity_fqdn(&self) -> String {
        let host = self.identity_url.host_str().unwrap_or_default();
        match self.identity_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    pub fn client_id(&self) -> &'static str {
        match self.environment {
            Environment::Production => PRODUCTION_CLIENT_ID,
            Environment::Local | Environment::Spin { .. } => DEVELOPMENT_CLIENT_ID,
        }
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://{}:{}", self.redirect_host, self.redirect_port)
    }

    pub fn identity_endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.identity_url.join(path)
    }

    pub fn partners_endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.partners_url.join(path)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn truthy_var(name: &str) -> bool {
    non_empty_var(name)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Locates the per-user directory holding cached credentials.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("com", "shopcli", "shopcli")
            .ok_or(ConfigError::MissingProjectDirs)?;
        let config_dir = dirs.config_dir();
        fs::create_dir_all(config_dir).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(config_dir)?;
        Ok(Self {
            root: config_dir.to_path_buf(),
        })
    }

    /// Path of the file backing a secure-storage key.
    pub fn secret_file(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    #[cfg(test)]
    pub(crate) fn from_root_for_tests(root: PathBuf) -> Self {
        Self { root }
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Errors raised while assembling configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for shopcli")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("unknown service environment '{0}'")]
    UnknownEnvironment(String),
    #[error("SHOPCLI_SPIN_FQDN must be set when SHOPCLI_SERVICE_ENV=spin")]
    MissingSpinFqdn,
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
