// ABOUTME: Database management over sqlx SQLite with programmatic migrations
// ABOUTME: Per-domain operations live in submodules; this module owns the pool and schema
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! # Database Management
//!
//! Pool ownership and schema migrations for the authorization server. Domain
//! operations are implemented on [`Database`] in the submodules. All
//! timestamps are stored as unix seconds and UUIDs as their hyphenated text
//! form.

mod auth_codes;
mod clients;
mod consents;
mod key_pairs;
mod refresh_tokens;
mod users;

use crate::errors::{AppError, AppResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use uuid::Uuid;

/// Database manager for users, clients, grants, and signing keys
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Create an in-memory database. The pool is capped at one connection so
    /// every query sees the same memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails
    pub async fn new_in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get a reference to the database pool for advanced operations
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails
    pub async fn migrate(&self) -> Result<()> {
        self.migrate_users().await?;
        self.migrate_clients().await?;
        self.migrate_key_pairs().await?;
        self.migrate_grants().await?;
        self.migrate_consents().await?;
        Ok(())
    }

    async fn migrate_users(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                hashed_password TEXT NOT NULL,
                full_name TEXT,
                is_active BOOLEAN NOT NULL DEFAULT true,
                is_verified BOOLEAN NOT NULL DEFAULT false,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn migrate_clients(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                client_secret TEXT NOT NULL,
                client_type TEXT NOT NULL DEFAULT 'confidential',
                redirect_uris TEXT NOT NULL DEFAULT '[]',
                allowed_scopes TEXT NOT NULL DEFAULT '["openid"]',
                response_types TEXT NOT NULL DEFAULT '["code"]',
                grant_types TEXT NOT NULL DEFAULT '["authorization_code"]',
                token_endpoint_auth_method TEXT NOT NULL DEFAULT 'client_secret_basic',
                id_token_signed_response_alg TEXT NOT NULL DEFAULT 'RS256',
                require_pkce BOOLEAN NOT NULL DEFAULT false,
                allow_offline_access BOOLEAN NOT NULL DEFAULT false,
                access_token_timeout INTEGER NOT NULL DEFAULT 3600,
                refresh_token_timeout INTEGER NOT NULL DEFAULT 86400,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn migrate_key_pairs(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS key_pairs (
                id TEXT PRIMARY KEY,
                algorithm TEXT NOT NULL DEFAULT 'RS256',
                public_key TEXT NOT NULL,
                private_key TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT false,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_key_pairs_active ON key_pairs(is_active)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn migrate_grants(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS authorization_codes (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                redirect_uri TEXT NOT NULL,
                scope TEXT NOT NULL,
                nonce TEXT,
                auth_time INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                code_challenge TEXT,
                code_challenge_method TEXT,
                used BOOLEAN NOT NULL DEFAULT false,
                claims TEXT,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_auth_codes_code ON authorization_codes(code)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                id TEXT PRIMARY KEY,
                token TEXT NOT NULL UNIQUE,
                client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                scope TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT false,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_token ON refresh_tokens(token)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id, client_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn migrate_consents(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS consents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                scopes TEXT NOT NULL DEFAULT '[]',
                is_active BOOLEAN NOT NULL DEFAULT true,
                created_at INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_consents_lookup ON consents(user_id, client_id, is_active)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Parse a stored hyphenated UUID column value
pub(crate) fn parse_uuid(value: &str, column: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| AppError::database(format!("Invalid UUID in column {column}: {e}")))
}

/// Convert a stored unix-seconds timestamp back to `DateTime<Utc>`
pub(crate) fn parse_timestamp(value: i64, column: &str) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp(value, 0)
        .ok_or_else(|| AppError::database(format!("Invalid timestamp in column {column}: {value}")))
}

/// Parse a stored JSON string-array column into a string collection
pub(crate) fn parse_string_set<T: FromIterator<String>>(value: &str, column: &str) -> AppResult<T> {
    let items: Vec<String> = serde_json::from_str(value)
        .map_err(|e| AppError::database(format!("Invalid JSON in column {column}: {e}")))?;
    Ok(items.into_iter().collect())
}

/// Serialize a string collection into its JSON storage form
pub(crate) fn encode_string_set<'a, I: IntoIterator<Item = &'a String>>(items: I) -> String {
    serde_json::to_string(&items.into_iter().collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string())
}
