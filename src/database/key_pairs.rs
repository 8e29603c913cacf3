// ABOUTME: Signing key pair storage with single-active rotation
// ABOUTME: Activation deactivates all other keys in the same transaction
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use super::{parse_timestamp, parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::KeyPair;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

fn row_to_key_pair(row: &SqliteRow) -> AppResult<KeyPair> {
    Ok(KeyPair {
        id: parse_uuid(&row.get::<String, _>("id"), "key_pairs.id")?,
        algorithm: row.get("algorithm"),
        public_key: row.get("public_key"),
        private_key: row.get("private_key"),
        is_active: row.get("is_active"),
        created_at: parse_timestamp(row.get("created_at"), "key_pairs.created_at")?,
    })
}

impl Database {
    /// Store a newly generated key pair
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn insert_key_pair(&self, key_pair: &KeyPair) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO key_pairs (id, algorithm, public_key, private_key, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(key_pair.id.to_string())
        .bind(&key_pair.algorithm)
        .bind(&key_pair.public_key)
        .bind(&key_pair.private_key)
        .bind(key_pair.is_active)
        .bind(key_pair.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to store key pair: {e}")))?;

        Ok(())
    }

    /// Get the currently active signing key, if any
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_active_key_pair(&self) -> AppResult<Option<KeyPair>> {
        let row = sqlx::query("SELECT * FROM key_pairs WHERE is_active = true LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to query active key pair: {e}")))?;

        row.as_ref().map(row_to_key_pair).transpose()
    }

    /// Get a key pair by id
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_key_pair(&self, key_id: Uuid) -> AppResult<Option<KeyPair>> {
        let row = sqlx::query("SELECT * FROM key_pairs WHERE id = $1")
            .bind(key_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to query key pair: {e}")))?;

        row.as_ref().map(row_to_key_pair).transpose()
    }

    /// List all key pairs, newest first
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn list_key_pairs(&self) -> AppResult<Vec<KeyPair>> {
        let rows = sqlx::query("SELECT * FROM key_pairs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list key pairs: {e}")))?;

        rows.iter().map(row_to_key_pair).collect()
    }

    /// Make the given key the single active signing key.
    /// All other keys are deactivated in the same transaction; they stay
    /// available for verification by kid.
    ///
    /// # Errors
    /// Returns an error if the key does not exist or the transaction fails
    pub async fn activate_key_pair(&self, key_id: Uuid) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query("UPDATE key_pairs SET is_active = false WHERE is_active = true")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to deactivate key pairs: {e}")))?;

        let result = sqlx::query("UPDATE key_pairs SET is_active = true WHERE id = $1")
            .bind(key_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to activate key pair: {e}")))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| AppError::database(format!("Failed to roll back: {e}")))?;
            return Err(AppError::not_found(format!("Key pair {key_id}")));
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit: {e}")))?;

        Ok(())
    }

    /// Delete a key pair. The active key is refused: tokens it signed would
    /// become unverifiable while it is still issuing new ones.
    ///
    /// # Errors
    /// Returns an error if the key is active, does not exist, or the delete fails
    pub async fn delete_key_pair(&self, key_id: Uuid) -> AppResult<()> {
        let existing = self
            .get_key_pair(key_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Key pair {key_id}")))?;

        if existing.is_active {
            return Err(AppError::invalid_input(
                "Cannot delete the active signing key; activate another key first",
            ));
        }

        sqlx::query("DELETE FROM key_pairs WHERE id = $1")
            .bind(key_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete key pair: {e}")))?;

        Ok(())
    }
}
