//! Configuration loading for the registry SCM service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `TFR_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "TFR_";

/// Largest accepted renewal window (one day).
pub const MAX_RENEWAL_WINDOW_SECONDS: u64 = 86_400;

/// Application configuration derived from `TFR_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    /// Public origin used to build OAuth callback and post-connect redirect URLs
    #[serde(default = "default_server_base_url")]
    pub server_base_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<Vec<u8>>,
    /// How long before expiry a stored credential is renewed ahead of use
    #[serde(default = "default_scm_renewal_window_seconds")]
    pub scm_renewal_window_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            server_base_url: default_server_base_url(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            api_tokens: Vec::new(),
            encryption_key: None,
            scm_renewal_window_seconds: default_scm_renewal_window_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Renewal window as a signed duration for timestamp arithmetic.
    pub fn renewal_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.scm_renewal_window_seconds.min(MAX_RENEWAL_WINDOW_SECONDS) as i64)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.api_tokens.is_empty() {
            config.api_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.encryption_key.is_some() {
            config.encryption_key = Some(b"[REDACTED]".to_vec());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.encryption_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidEncryptionKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingEncryptionKey),
        }

        if self.api_tokens.is_empty() {
            return Err(ConfigError::MissingApiTokens);
        }

        if self.scm_renewal_window_seconds > MAX_RENEWAL_WINDOW_SECONDS {
            return Err(ConfigError::InvalidRenewalWindow {
                value: self.scm_renewal_window_seconds,
            });
        }

        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidRequestTimeout {
                value: self.request_timeout_seconds,
            });
        }

        if url::Url::parse(&self.server_base_url).is_err() {
            return Err(ConfigError::InvalidServerBaseUrl {
                value: self.server_base_url.clone(),
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_server_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://registry.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_scm_renewal_window_seconds() -> u64 {
    300 // 5 minutes
}

fn default_request_timeout_seconds() -> u64 {
    30
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid server base url '{value}'")]
    InvalidServerBaseUrl { value: String },
    #[error("no API tokens configured; set TFR_API_TOKEN or TFR_API_TOKENS")]
    MissingApiTokens,
    #[error("encryption key is missing; set TFR_ENCRYPTION_KEY or ENCRYPTION_KEY")]
    MissingEncryptionKey,
    #[error("encryption key is invalid base64: {error}")]
    InvalidEncryptionKeyBase64 { error: String },
    #[error("encryption key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidEncryptionKeyLength { length: usize },
    #[error("SCM renewal window must be between 0 and 86400 seconds, got {value}")]
    InvalidRenewalWindow { value: u64 },
    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("request timeout must be at least 1 second, got {value}")]
    InvalidRequestTimeout { value: u64 },
}

/// Loads configuration using layered `.env` files and `TFR_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
    read_process_env: bool,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            read_process_env: true,
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            read_process_env: true,
        }
    }

    /// Ignore the process environment and read only the `.env` layers.
    pub fn without_process_env(mut self) -> Self {
        self.read_process_env = false;
        self
    }

    /// Loads `.env`, `.env.local`, `.env.{profile}`, `.env.{profile}.local`,
    /// then the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        if self.read_process_env {
            for (key, value) in env::vars() {
                if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                    layered.insert(stripped.to_string(), value);
                }
            }
            // The bare name is accepted for the key shared with the registry core.
            if !layered.contains_key("ENCRYPTION_KEY")
                && let Ok(value) = env::var("ENCRYPTION_KEY")
            {
                layered.insert("ENCRYPTION_KEY".to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let server_base_url = layered
            .remove("SERVER_BASE_URL")
            .filter(|v| !v.is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(default_server_base_url);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let scm_renewal_window_seconds = parse_number(
            &mut layered,
            "SCM_RENEWAL_WINDOW_SECONDS",
            default_scm_renewal_window_seconds,
        )?;
        let request_timeout_seconds = parse_number(
            &mut layered,
            "REQUEST_TIMEOUT_SECONDS",
            default_request_timeout_seconds,
        )?;

        // Support both a comma-separated list and a single token
        let api_tokens = if let Some(tokens) = layered.remove("API_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = layered.remove("API_TOKEN").filter(|t| !t.trim().is_empty())
        {
            vec![token.trim().to_string()]
        } else {
            Vec::new()
        };

        let encryption_key = match layered.remove("ENCRYPTION_KEY").filter(|v| !v.is_empty()) {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                let decoded = general_purpose::STANDARD
                    .decode(key_str.trim())
                    .map_err(|e| ConfigError::InvalidEncryptionKeyBase64 {
                        error: e.to_string(),
                    })?;
                Some(decoded)
            }
            None => None,
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            server_base_url,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            api_tokens,
            encryption_key,
            scm_renewal_window_seconds,
            request_timeout_seconds,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let process_profile = if self.read_process_env {
            env::var(format!("{ENV_PREFIX}PROFILE")).ok()
        } else {
            None
        };
        let profile = process_profile
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number(
    layered: &mut BTreeMap<String, String>,
    key: &'static str,
    default: fn() -> u64,
) -> Result<u64, ConfigError> {
    match layered.remove(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(default()),
    }
}
