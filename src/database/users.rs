// ABOUTME: User storage operations
// ABOUTME: Create and lookup of end-user accounts
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use super::{parse_timestamp, parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::User;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

fn row_to_user(row: &SqliteRow) -> AppResult<User> {
    Ok(User {
        id: parse_uuid(&row.get::<String, _>("id"), "users.id")?,
        email: row.get("email"),
        username: row.get("username"),
        hashed_password: row.get("hashed_password"),
        full_name: row.get("full_name"),
        is_active: row.get("is_active"),
        is_verified: row.get("is_verified"),
        created_at: parse_timestamp(row.get("created_at"), "users.created_at")?,
    })
}

impl Database {
    /// Create a new user
    ///
    /// # Errors
    /// Returns an error if the insert fails (including unique violations)
    pub async fn create_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, email, username, hashed_password, full_name,
                               is_active, is_verified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.hashed_password)
        .bind(&user.full_name)
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(user.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create user: {e}")))?;

        Ok(())
    }

    /// Get a user by id
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to query user: {e}")))?;

        row.as_ref().map(row_to_user).transpose()
    }
}
