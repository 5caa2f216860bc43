use crate::error::AppError;
use crate::monitor::RefreshPolicy;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "limiter";
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/api/oauth/usage";
pub const DEFAULT_BETA_HEADER: &str = "oauth-2025-04-20";
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "Claude Code-credentials";

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("LIMITER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "limiter", APP_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".limiter"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub refresh_seconds: u64,
    pub retry_base_seconds: u64,
    pub request_timeout_seconds: u64,
    pub endpoint: String,
    pub beta_header: String,
    pub credentials: CredentialSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub use_env: bool,
    pub use_keychain: bool,
    pub keychain_service: String,
    pub keychain_account: Option<String>,
    pub credentials_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_seconds: 300,
            retry_base_seconds: 10,
            request_timeout_seconds: 15,
            endpoint: DEFAULT_ENDPOINT.into(),
            beta_header: DEFAULT_BETA_HEADER.into(),
            credentials: CredentialSettings::default(),
        }
    }
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            use_env: true,
            use_keychain: true,
            keychain_service: DEFAULT_KEYCHAIN_SERVICE.into(),
            keychain_account: None,
            credentials_file: None,
        }
    }
}

impl AppConfig {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            interval: Duration::from_secs(self.refresh_seconds),
            retry_base: Duration::from_secs(self.retry_base_seconds),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.refresh_seconds < 10 {
            return Err(AppError::Config(
                "refresh_seconds must be at least 10".into(),
            ));
        }
        if self.retry_base_seconds == 0 || self.retry_base_seconds > self.refresh_seconds {
            return Err(AppError::Config(
                "retry_base_seconds must be between 1 and refresh_seconds".into(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "request_timeout_seconds must be at least 1".into(),
            ));
        }
        match url::Url::parse(&self.endpoint) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
            _ => Err(AppError::Config(format!(
                "endpoint '{}' is not an http(s) URL",
                self.endpoint
            ))),
        }
    }
}

impl CredentialSettings {
    pub fn keychain_account(&self) -> Option<String> {
        self.keychain_account
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .filter(|account| !account.is_empty())
    }

    pub fn credentials_file(&self) -> Option<PathBuf> {
        self.credentials_file.clone().or_else(|| {
            directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".claude").join(".credentials.json"))
        })
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn log_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("logs"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(log_dir()?)?;
    Ok(())
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from(&config_path()?)
}

fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: AppConfig = toml::from_str(&raw)?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(config_path()?, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    if !config_path()?.exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
