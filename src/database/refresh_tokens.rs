// ABOUTME: Refresh token storage with atomic rotation and bulk revocation
// ABOUTME: Rotation consumes via one conditional UPDATE; end-session revokes per user
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use super::{parse_timestamp, parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::RefreshToken;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

fn row_to_refresh_token(row: &SqliteRow) -> AppResult<RefreshToken> {
    Ok(RefreshToken {
        id: parse_uuid(&row.get::<String, _>("id"), "refresh_tokens.id")?,
        token: row.get("token"),
        client_id: parse_uuid(
            &row.get::<String, _>("client_id"),
            "refresh_tokens.client_id",
        )?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"), "refresh_tokens.user_id")?,
        scope: row.get("scope"),
        expires_at: parse_timestamp(row.get("expires_at"), "refresh_tokens.expires_at")?,
        revoked: row.get("revoked"),
        created_at: parse_timestamp(row.get("created_at"), "refresh_tokens.created_at")?,
    })
}

impl Database {
    /// Store a freshly issued refresh token
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn insert_refresh_token(&self, token: &RefreshToken) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO refresh_tokens (id, token, client_id, user_id, scope,
                                        expires_at, revoked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(token.id.to_string())
        .bind(&token.token)
        .bind(token.client_id.to_string())
        .bind(token.user_id.to_string())
        .bind(&token.scope)
        .bind(token.expires_at.timestamp())
        .bind(token.revoked)
        .bind(token.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to store refresh token: {e}")))?;

        Ok(())
    }

    /// Look up a refresh token that is still valid for the given client.
    /// Used for non-rotating refresh grants; the token stays live.
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_valid_refresh_token(
        &self,
        token: &str,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RefreshToken>> {
        let row = sqlx::query(
            r"
            SELECT * FROM refresh_tokens
            WHERE token = $1 AND client_id = $2 AND revoked = false AND expires_at > $3
            ",
        )
        .bind(token)
        .bind(client_id.to_string())
        .bind(now.timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to query refresh token: {e}")))?;

        row.as_ref().map(row_to_refresh_token).transpose()
    }

    /// Atomically consume a refresh token for rotation. Same single-winner
    /// shape as authorization-code consumption. Returns `None` when the token
    /// is unknown, revoked, expired, or belongs to another client.
    ///
    /// # Errors
    /// Returns an error if a query fails
    pub async fn consume_refresh_token(
        &self,
        token: &str,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<RefreshToken>> {
        let result = sqlx::query(
            r"
            UPDATE refresh_tokens
            SET revoked = true
            WHERE token = $1 AND client_id = $2 AND revoked = false AND expires_at > $3
            ",
        )
        .bind(token)
        .bind(client_id.to_string())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to consume refresh token: {e}")))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to load refresh token: {e}")))?;

        row.as_ref().map(row_to_refresh_token).transpose()
    }

    /// Revoke a single refresh token. Returns whether a live token was revoked.
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_refresh_token(&self, token: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true WHERE token = $1 AND revoked = false",
        )
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to revoke refresh token: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke every live refresh token for a user, optionally scoped to one
    /// client. Returns how many were revoked.
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        client_id: Option<Uuid>,
    ) -> AppResult<u64> {
        let result = match client_id {
            Some(client_id) => {
                sqlx::query(
                    r"
                    UPDATE refresh_tokens SET revoked = true
                    WHERE user_id = $1 AND client_id = $2 AND revoked = false
                    ",
                )
                .bind(user_id.to_string())
                .bind(client_id.to_string())
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "UPDATE refresh_tokens SET revoked = true WHERE user_id = $1 AND revoked = false",
                )
                .bind(user_id.to_string())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| AppError::database(format!("Failed to revoke refresh tokens: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Delete expired refresh tokens, returning how many were removed
    ///
    /// # Errors
    /// Returns an error if the delete fails
    pub async fn purge_expired_refresh_tokens(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to purge refresh tokens: {e}")))?;

        Ok(result.rows_affected())
    }
}
