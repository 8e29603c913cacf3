// ABOUTME: Authorization code storage with atomic single-use consumption
// ABOUTME: Consumption is one conditional UPDATE so concurrent redemptions have a single winner
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use super::{parse_timestamp, parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{AuthorizationCode, CodeChallengeMethod};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

fn row_to_auth_code(row: &SqliteRow) -> AppResult<AuthorizationCode> {
    let claims = row
        .get::<Option<String>, _>("claims")
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| {
                AppError::database(format!("Invalid JSON in column authorization_codes.claims: {e}"))
            })
        })
        .transpose()?;

    Ok(AuthorizationCode {
        id: parse_uuid(&row.get::<String, _>("id"), "authorization_codes.id")?,
        code: row.get("code"),
        client_id: parse_uuid(
            &row.get::<String, _>("client_id"),
            "authorization_codes.client_id",
        )?,
        user_id: parse_uuid(
            &row.get::<String, _>("user_id"),
            "authorization_codes.user_id",
        )?,
        redirect_uri: row.get("redirect_uri"),
        scope: row.get("scope"),
        nonce: row.get("nonce"),
        auth_time: parse_timestamp(row.get("auth_time"), "authorization_codes.auth_time")?,
        expires_at: parse_timestamp(row.get("expires_at"), "authorization_codes.expires_at")?,
        code_challenge: row.get("code_challenge"),
        code_challenge_method: row
            .get::<Option<String>, _>("code_challenge_method")
            .as_deref()
            .and_then(CodeChallengeMethod::parse),
        used: row.get("used"),
        claims,
        created_at: parse_timestamp(row.get("created_at"), "authorization_codes.created_at")?,
    })
}

impl Database {
    /// Store a freshly issued authorization code
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn insert_auth_code(&self, code: &AuthorizationCode) -> AppResult<()> {
        let claims = code
            .claims
            .as_ref()
            .map(|c| {
                serde_json::to_string(c)
                    .map_err(|e| AppError::internal(format!("Failed to encode claims: {e}")))
            })
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO authorization_codes (id, code, client_id, user_id, redirect_uri, scope,
                                             nonce, auth_time, expires_at, code_challenge,
                                             code_challenge_method, used, claims, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(code.id.to_string())
        .bind(&code.code)
        .bind(code.client_id.to_string())
        .bind(code.user_id.to_string())
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(&code.nonce)
        .bind(code.auth_time.timestamp())
        .bind(code.expires_at.timestamp())
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.map(CodeChallengeMethod::as_str))
        .bind(code.used)
        .bind(claims)
        .bind(code.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to store authorization code: {e}")))?;

        Ok(())
    }

    /// Atomically consume an authorization code. The conditional UPDATE only
    /// succeeds for an unused, unexpired code bound to the given client and
    /// redirect URI, so exactly one of any concurrent redemptions wins.
    /// Returns `None` when no such code exists.
    ///
    /// # Errors
    /// Returns an error if a query fails
    pub async fn consume_auth_code(
        &self,
        code: &str,
        client_id: Uuid,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<AuthorizationCode>> {
        let result = sqlx::query(
            r"
            UPDATE authorization_codes
            SET used = true
            WHERE code = $1 AND client_id = $2 AND redirect_uri = $3
              AND used = false AND expires_at > $4
            ",
        )
        .bind(code)
        .bind(client_id.to_string())
        .bind(redirect_uri)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to consume authorization code: {e}")))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM authorization_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to load authorization code: {e}")))?;

        row.as_ref().map(row_to_auth_code).transpose()
    }

    /// Delete expired authorization codes, returning how many were removed
    ///
    /// # Errors
    /// Returns an error if the delete fails
    pub async fn purge_expired_auth_codes(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM authorization_codes WHERE expires_at <= $1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::database(format!("Failed to purge authorization codes: {e}"))
            })?;

        Ok(result.rows_affected())
    }
}
