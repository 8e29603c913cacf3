// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables, deployment modes, and runtime configuration parsing
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! Environment-based configuration for the authorization server

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tracing::warn;

/// Strongly typed log level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }

    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

/// Environment type for security and other configurations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Type-safe database location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DatabaseUrl {
    /// SQLite database with file path
    SQLite { path: PathBuf },
    /// In-memory SQLite (for testing)
    Memory,
}

impl DatabaseUrl {
    /// Parse from string; bare paths are treated as SQLite files
    #[must_use]
    pub fn parse_url(s: &str) -> Self {
        let path_str = s.strip_prefix("sqlite:").unwrap_or(s);
        if path_str == ":memory:" {
            Self::Memory
        } else {
            Self::SQLite {
                path: PathBuf::from(path_str),
            }
        }
    }

    /// Convert to a sqlx connection string
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        match self {
            // rwc: create the database file on first run
            Self::SQLite { path } => format!("sqlite:{}?mode=rwc", path.display()),
            Self::Memory => "sqlite::memory:".to_string(),
        }
    }

    /// Check if this is an in-memory database
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl Default for DatabaseUrl {
    fn default() -> Self {
        Self::SQLite {
            path: PathBuf::from("./data/aegis.db"),
        }
    }
}

/// Token lifetime defaults, overridable per client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTtlConfig {
    /// Authorization code lifetime in seconds
    pub auth_code_ttl_secs: i64,
    /// Default access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// Default refresh token lifetime in seconds
    pub refresh_token_ttl_secs: i64,
}

impl Default for TokenTtlConfig {
    fn default() -> Self {
        Self {
            auth_code_ttl_secs: 600,
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 86400,
        }
    }
}

/// OIDC issuer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// External base URL of this server; becomes the `iss` claim
    /// (normalized to carry a trailing slash)
    pub issuer_url: String,
    /// HMAC secret used to sign tokens when no RSA key pair exists
    pub jwt_secret: String,
    /// Token lifetimes
    pub ttl: TokenTtlConfig,
}

impl OidcConfig {
    /// Issuer value as it appears in tokens and the discovery document
    #[must_use]
    pub fn issuer(&self) -> String {
        if self.issuer_url.ends_with('/') {
            self.issuer_url.clone()
        } else {
            format!("{}/", self.issuer_url)
        }
    }
}

/// Complete server configuration assembled from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Log level
    pub log_level: LogLevel,
    /// Database location
    pub database_url: DatabaseUrl,
    /// Redis URL for the access-token blacklist; absent means in-memory
    pub redis_url: Option<String>,
    /// OIDC issuer settings
    pub oidc: OidcConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing (`JWT_SECRET`)
    /// or a numeric variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let http_port = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse::<u16>()
            .context("Invalid HTTP_PORT")?;

        let environment = Environment::from_str_or_default(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        );

        let log_level = LogLevel::from_str_or_default(
            &env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        );

        let database_url = env::var("DATABASE_URL")
            .map(|s| DatabaseUrl::parse_url(&s))
            .unwrap_or_default();

        let redis_url = env::var("REDIS_URL").ok();
        if redis_url.is_none() {
            warn!("REDIS_URL not set, access-token revocation will use the in-memory blacklist");
        }

        let issuer_url =
            env::var("ISSUER_URL").unwrap_or_else(|_| format!("http://localhost:{http_port}"));
        url::Url::parse(&issuer_url).context("ISSUER_URL must be an absolute URL")?;

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let ttl = TokenTtlConfig {
            auth_code_ttl_secs: parse_env_i64("AUTH_CODE_TTL_SECS", 600)?,
            access_token_ttl_secs: parse_env_i64("ACCESS_TOKEN_TTL_SECS", 3600)?,
            refresh_token_ttl_secs: parse_env_i64("REFRESH_TOKEN_TTL_SECS", 86400)?,
        };

        Ok(Self {
            http_port,
            environment,
            log_level,
            database_url,
            redis_url,
            oidc: OidcConfig {
                issuer_url,
                jwt_secret,
                ttl,
            },
        })
    }
}

fn parse_env_i64(name: &str, default: i64) -> Result<i64> {
    match env::var(name) {
        Ok(v) => v
            .parse::<i64>()
            .with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(default),
    }
}
