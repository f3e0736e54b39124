//! relogin configuration management
//!
//! Handles configuration from environment variables and TOML files with
//! sensible defaults for development. `AppConfig::validate` must run at
//! startup: a bad login policy is the only fatal condition and it must never
//! surface while serving a request.

use crate::codec::HashConfig;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Persistent login policy
    pub login: LoginConfig,

    /// Token secret hashing cost
    pub hashing: HashConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError { path, message },
            other => other,
        })
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse("API_PORT")? {
            self.server.port = port;
        }
        if let Ok(header) = std::env::var("RELOGIN_PRINCIPAL_HEADER") {
            self.server.principal_header = header;
        }
        if let Some(secs) = env_parse("RELOGIN_SESSION_IDLE_SECS")? {
            self.server.session_idle_timeout_secs = secs;
        }

        // CORS origins from environment variable (comma-separated)
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // PostgreSQL
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.postgres_url = Some(url);
        }

        // Login policy
        if let Some(allow) = env_parse("RELOGIN_ALLOW_MULTIPLE_LOGIN")? {
            self.login.allow_multiple_login = allow;
        }
        if let Some(strong) = env_parse("RELOGIN_STRONG_SESSIONS")? {
            self.login.strong_sessions = strong;
        }
        if let Some(tie) = env_parse("RELOGIN_TIE_TOKEN_TO_IP")? {
            self.login.tie_token_to_ip = tie;
        }
        if let Some(secs) = env_parse("RELOGIN_TOKEN_EXPIRATION_SECS")? {
            self.login.token_expiration_secs = Some(secs);
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Check every invariant that would otherwise fail at request time
    pub fn validate(&self) -> Result<LoginPolicy, ConfigError> {
        self.hashing
            .to_params()
            .map_err(|e| ConfigError::InvalidValue {
                key: "hashing".to_string(),
                value: e.to_string(),
            })?;

        self.server.session_idle_timeout()?;

        LoginPolicy::try_from(&self.login)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,

    /// Header set by the upstream authenticator after a password check
    pub principal_header: String,

    /// Mark cookies `Secure` (disable only for local HTTP development)
    pub secure_cookies: bool,

    /// Server-side sessions unused for this many seconds are dropped
    pub session_idle_timeout_secs: i64,
}

impl ServerConfig {
    /// Idle lifetime of a server-side session
    pub fn session_idle_timeout(&self) -> Result<Duration, ConfigError> {
        let secs = self.session_idle_timeout_secs;
        Duration::try_seconds(secs)
            .filter(|_| secs > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "server.session_idle_timeout_secs".to_string(),
                value: secs.to_string(),
            })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            // Empty by default for security - set via CORS_ORIGINS env var
            cors_origins: vec![],
            principal_header: "x-authenticated-principal".to_string(),
            secure_cookies: true,
            session_idle_timeout_secs: 86400,
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; tokens are kept in memory when unset
    pub postgres_url: Option<String>,

    /// PostgreSQL connection pool size
    pub postgres_pool_size: u32,

    /// Per-query timeout in seconds
    pub query_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            postgres_pool_size: 10,
            query_timeout_secs: 5,
        }
    }
}

/// Persistent login configuration as written in files and env
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Allow the same principal to stay logged in on several devices.
    /// When false, every login evicts all of the principal's tokens.
    pub allow_multiple_login: bool,

    /// Also store the composite in the session and revalidate it against
    /// storage on every request
    pub strong_sessions: bool,

    /// Accept a token only from the IP address it was issued to
    pub tie_token_to_ip: bool,

    /// Maximum token age in seconds (unset: tokens never expire)
    pub token_expiration_secs: Option<i64>,

    /// Lifetime of "permanent" cookies in days
    pub cookie_max_age_days: i64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            allow_multiple_login: true,
            strong_sessions: true,
            tie_token_to_ip: false,
            token_expiration_secs: None,
            cookie_max_age_days: 365,
        }
    }
}

/// Validated, immutable login policy handed to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPolicy {
    pub allow_multiple_login: bool,
    pub strong_sessions: bool,
    pub tie_token_to_ip: bool,
    pub token_expiration: Option<Duration>,
    pub cookie_max_age: Duration,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        // Defaults are known-valid
        Self {
            allow_multiple_login: true,
            strong_sessions: true,
            tie_token_to_ip: false,
            token_expiration: None,
            cookie_max_age: Duration::days(365),
        }
    }
}

impl TryFrom<&LoginConfig> for LoginPolicy {
    type Error = ConfigError;

    fn try_from(config: &LoginConfig) -> Result<Self, Self::Error> {
        let token_expiration = match config.token_expiration_secs {
            Some(secs) if secs <= 0 => {
                return Err(ConfigError::InvalidValue {
                    key: "login.token_expiration_secs".to_string(),
                    value: secs.to_string(),
                })
            }
            Some(secs) => Some(
                Duration::try_seconds(secs).ok_or_else(|| ConfigError::InvalidValue {
                    key: "login.token_expiration_secs".to_string(),
                    value: secs.to_string(),
                })?,
            ),
            None => None,
        };

        if config.cookie_max_age_days <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "login.cookie_max_age_days".to_string(),
                value: config.cookie_max_age_days.to_string(),
            });
        }
        let cookie_max_age = Duration::try_days(config.cookie_max_age_days).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "login.cookie_max_age_days".to_string(),
                value: config.cookie_max_age_days.to_string(),
            }
        })?;

        Ok(Self {
            allow_multiple_login: config.allow_multiple_login,
            strong_sessions: config.strong_sessions,
            tie_token_to_ip: config.tie_token_to_ip,
            token_expiration,
            cookie_max_age,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
