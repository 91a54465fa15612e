//! Configuration loading for hearthbind services.
//!
//! TOML file + environment merge (via figment), credential resolution
//! (env var, then plaintext), and translation into the runtime types the
//! other crates consume: `TransportConfig`, `Credentials`, and
//! `DeviceConfig`. The runtime crates never touch disk themselves.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use hearthbind_api::{Credentials, TlsMode, TransportConfig};
use hearthbind_core::DeviceConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for account")]
    NoCredentials,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration for one vendor account and its devices.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    pub account: AccountProfile,

    /// Defaults applied to devices that omit the corresponding field.
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
}

/// Connection and credential settings for the vendor account.
#[derive(Debug, Deserialize, Serialize)]
pub struct AccountProfile {
    /// Vendor API base URL (e.g. `https://api.vendor.example/`).
    pub base_url: String,

    pub username: Option<String>,

    /// Plaintext password -- prefer `password_env`.
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Skip TLS verification (self-signed local bridges).
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,
}

impl Default for AccountProfile {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: None,
            password: None,
            password_env: None,
            timeout_secs: default_timeout(),
            insecure: false,
            ca_cert: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_offline_threshold")]
    pub offline_threshold: u32,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            offline_threshold: default_offline_threshold(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

fn default_offline_threshold() -> u32 {
    2
}
fn default_max_backoff() -> u64 {
    300
}

/// One device section.
#[derive(Debug, Deserialize, Serialize)]
pub struct DeviceProfile {
    pub id: String,

    #[serde(default)]
    pub categories: Vec<CategoryProfile>,

    pub offline_threshold: Option<u32>,
    pub rate_budget_per_minute: Option<u32>,
    pub max_backoff_secs: Option<u64>,

    #[serde(default = "default_jitter")]
    pub initial_jitter: bool,
}

fn default_jitter() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CategoryProfile {
    pub id: String,
    pub refresh_interval_secs: u64,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "hearthbind", "hearthbind").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hearthbind");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_from(&config_path())
}

/// Load from an explicit file path + environment.
pub fn load_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HEARTHBIND_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the given path.
pub fn save_to(cfg: &Config, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the account password: env var first, then plaintext.
pub fn resolve_password(account: &AccountProfile) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = account.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Some(ref pw) = account.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials)
}

/// Build transport-layer `Credentials` from the account section.
pub fn account_credentials(account: &AccountProfile) -> Result<Credentials, ConfigError> {
    let username = account
        .username
        .clone()
        .ok_or(ConfigError::NoCredentials)?;
    let password = resolve_password(account)?;
    Ok(Credentials { username, password })
}

// ── Runtime type translation ────────────────────────────────────────

/// Parse and validate the account base URL.
pub fn account_base_url(account: &AccountProfile) -> Result<Url, ConfigError> {
    account
        .base_url
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("invalid URL: {}", account.base_url),
        })
}

/// Build a `TransportConfig` from the account section.
pub fn account_transport(account: &AccountProfile) -> TransportConfig {
    let tls = if account.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = account.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    TransportConfig {
        tls,
        timeout: Duration::from_secs(account.timeout_secs),
        ..TransportConfig::default()
    }
}

/// Build a runtime `DeviceConfig` from a device section, filling gaps
/// from the defaults. Validation happens here so a broken section fails
/// at load time, before anything is scheduled.
pub fn device_config(
    profile: &DeviceProfile,
    defaults: &Defaults,
) -> Result<DeviceConfig, ConfigError> {
    let mut config = DeviceConfig::new(profile.id.as_str())
        .offline_threshold(profile.offline_threshold.unwrap_or(defaults.offline_threshold))
        .initial_jitter(profile.initial_jitter);

    config.max_backoff =
        Duration::from_secs(profile.max_backoff_secs.unwrap_or(defaults.max_backoff_secs));
    config.rate_budget_per_minute = profile.rate_budget_per_minute;

    for cat in &profile.categories {
        config = config.category(
            cat.id.as_str(),
            Duration::from_secs(cat.refresh_interval_secs),
        );
    }

    config.validate().map_err(|e| ConfigError::Validation {
        field: format!("devices.{}", profile.id),
        reason: e.to_string(),
    })?;

    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────
