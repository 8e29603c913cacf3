// ABOUTME: Consent record storage with single-active-row semantics
// ABOUTME: Recording consent deactivates the prior row and inserts the scope union
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use super::{encode_string_set, parse_string_set, parse_timestamp, parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::Consent;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

fn row_to_consent(row: &SqliteRow) -> AppResult<Consent> {
    Ok(Consent {
        id: parse_uuid(&row.get::<String, _>("id"), "consents.id")?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"), "consents.user_id")?,
        client_id: parse_uuid(&row.get::<String, _>("client_id"), "consents.client_id")?,
        scopes: parse_string_set(&row.get::<String, _>("scopes"), "consents.scopes")?,
        is_active: row.get("is_active"),
        created_at: parse_timestamp(row.get("created_at"), "consents.created_at")?,
    })
}

impl Database {
    /// Get the active consent row for a (user, client) pair, if any
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_active_consent(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> AppResult<Option<Consent>> {
        let row = sqlx::query(
            r"
            SELECT * FROM consents
            WHERE user_id = $1 AND client_id = $2 AND is_active = true
            LIMIT 1
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to query consent: {e}")))?;

        row.as_ref().map(row_to_consent).transpose()
    }

    /// Record consent for a (user, client) pair. The new active row holds the
    /// union of previously approved scopes and the newly approved ones; the
    /// prior row is deactivated in the same transaction and kept for audit.
    ///
    /// # Errors
    /// Returns an error if the transaction fails
    pub async fn record_consent(
        &self,
        user_id: Uuid,
        client_id: Uuid,
        scopes: &BTreeSet<String>,
    ) -> AppResult<Consent> {
        let mut merged = scopes.clone();
        if let Some(existing) = self.get_active_consent(user_id, client_id).await? {
            merged.extend(existing.scopes);
        }

        let consent = Consent {
            id: Uuid::new_v4(),
            user_id,
            client_id,
            scopes: merged,
            is_active: true,
            created_at: Utc::now(),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(
            r"
            UPDATE consents SET is_active = false
            WHERE user_id = $1 AND client_id = $2 AND is_active = true
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to deactivate consent: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO consents (id, user_id, client_id, scopes, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(consent.id.to_string())
        .bind(consent.user_id.to_string())
        .bind(consent.client_id.to_string())
        .bind(encode_string_set(&consent.scopes))
        .bind(consent.is_active)
        .bind(consent.created_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to record consent: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit: {e}")))?;

        Ok(consent)
    }

    /// Deactivate the active consent row for a (user, client) pair.
    /// Returns whether a row was deactivated.
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_consent(&self, user_id: Uuid, client_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE consents SET is_active = false
            WHERE user_id = $1 AND client_id = $2 AND is_active = true
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to revoke consent: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
