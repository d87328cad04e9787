//! Configuration types and loading
//!
//! Precedence: env vars > config file > defaults. The application token is
//! read from `COZY_TOKEN` or `token_file`, never from the TOML body.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use cozy_auth::{ClientParams, Url};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub cozy: CozyConfig,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

/// Target instance and application-token settings
#[derive(Debug, Deserialize)]
pub struct CozyConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// File holding the application token (alternative to `COZY_TOKEN`)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// OAuth client settings. Present means OAuth mode.
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    /// JSON file for durable credentials. In memory when absent.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    #[serde(default)]
    pub storage_prefix: Option<String>,
    #[serde(flatten)]
    pub client: ClientParams,
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay the environment.
    ///
    /// Token resolution order:
    /// 1. `COZY_TOKEN` env var
    /// 2. `token_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| common::Error::io(path, e))?;
        let mut config: Config =
            toml::from_str(&contents).map_err(|e| common::Error::toml(path, e))?;

        config.base_url()?;
        if config.cozy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if let Ok(token) = std::env::var("COZY_TOKEN") {
            let token = Secret::trimmed(&token);
            if !token.is_empty() {
                config.cozy.token = Some(token);
            }
        } else if let Some(ref token_file) = config.cozy.token_file {
            let raw = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = Secret::trimmed(&raw);
            if !token.is_empty() {
                config.cozy.token = Some(token);
            }
        }

        if config.cozy.token.is_some() && config.oauth.is_some() {
            return Err(common::Error::Config(
                "an application token and an [oauth] section cannot be used together".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve the config file path: explicit argument, then `COZY_CONFIG`,
    /// then `cozy.toml` in the working directory.
    pub fn resolve_path(explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("COZY_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("cozy.toml")
    }

    pub fn base_url(&self) -> common::Result<Url> {
        let url = Url::parse(&self.cozy.url).map_err(|e| {
            common::Error::Config(format!("invalid cozy url {:?}: {e}", self.cozy.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(common::Error::Config(format!(
                "cozy url must start with http:// or https://, got: {}",
                self.cozy.url
            )));
        }
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.cozy.timeout_secs)
    }
}
