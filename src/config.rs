use std::env;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

type Result<T> = std::result::Result<T, ConfigError>;

pub const CONFIG_FILE_ENV: &str = "GITHUB_AUTOSAVE_CONFIG_FILE";

/// Ten years. Larger thresholds overflow the date arithmetic in staleness checks.
pub const MAX_STALE_AFTER_HOURS: u64 = 24 * 365 * 10;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Config {
    pub projects_dir: PathBuf,
    pub hosting_username: String,
    pub hosting_token: String,
    // An empty key means "no AI", commits then use the timestamped fallback message.
    #[serde(default)]
    pub ai_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_ai_url")]
    pub ai_url: String,
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
    #[serde(default)]
    pub private_repos: bool,
    #[serde(default = "default_stale_after_hours")]
    pub stale_after_hours: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    pub commit_author: Option<String>,
    pub commit_email: Option<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_ai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_stale_after_hours() -> u64 {
    24
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

impl Config {
    pub fn new(
        projects_dir: impl Into<PathBuf>,
        hosting_username: impl Into<String>,
        hosting_token: impl Into<String>,
    ) -> Self {
        Self {
            projects_dir: projects_dir.into(),
            hosting_username: hosting_username.into(),
            hosting_token: hosting_token.into(),
            ai_key: None,
            api_url: default_api_url(),
            ai_url: default_ai_url(),
            ai_model: default_ai_model(),
            private_repos: false,
            stale_after_hours: default_stale_after_hours(),
            http_timeout_secs: default_http_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            commit_author: None,
            commit_email: None,
        }
    }

    /// Location of the config file. By default
    ///
    /// Linux   :   $XDG_CONFIG_HOME/github-autosave/config.toml or $HOME/.config/github-autosave/config.toml
    /// macOS   :   $HOME/Library/Application Support/github-autosave/config.toml
    /// Windows :   %AppData%\Roaming\github-autosave\config.toml
    ///
    /// This can be overridden by setting the GITHUB_AUTOSAVE_CONFIG_FILE environment variable.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(env_var) = env::var(CONFIG_FILE_ENV) {
            if !env_var.is_empty() {
                return Ok(env_var.into());
            }
        }

        dirs::config_dir()
            .map(|dir| dir.join("github-autosave").join("config.toml"))
            .ok_or(ConfigError::NoConfigHome)
    }

    /// Load and validate the config from an explicit path, or the default one.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let config = Self::load_file(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let mut reader = BufReader::new(file);

        let mut buffer = String::new();
        reader
            .read_to_string(&mut buffer)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config: Config = toml::from_str(&buffer).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.ai_key.as_deref().map(str::trim) == Some("") {
            config.ai_key = None;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hosting_username.trim().is_empty() {
            return Err(ConfigError::Missing("hosting_username"));
        }
        if self.hosting_token.trim().is_empty() {
            return Err(ConfigError::Missing("hosting_token"));
        }
        if !self.projects_dir.is_dir() {
            return Err(ConfigError::ProjectsDir(self.projects_dir.clone()));
        }
        if self.stale_after_hours > MAX_STALE_AFTER_HOURS {
            return Err(ConfigError::StaleAfterOutOfRange {
                value: self.stale_after_hours,
                max: MAX_STALE_AFTER_HOURS,
            });
        }
        Ok(())
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_after_hours.min(MAX_STALE_AFTER_HOURS) as i64)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts)
    }
}
