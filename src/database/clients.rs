// ABOUTME: OAuth2/OIDC client registration storage
// ABOUTME: Create and lookup of registered clients with their policy columns
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use super::{encode_string_set, parse_string_set, parse_timestamp, parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Client, ClientType};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

fn row_to_client(row: &SqliteRow) -> AppResult<Client> {
    Ok(Client {
        id: parse_uuid(&row.get::<String, _>("id"), "clients.id")?,
        title: row.get("title"),
        description: row.get("description"),
        client_secret: row.get("client_secret"),
        client_type: ClientType::from_str_or_default(&row.get::<String, _>("client_type")),
        redirect_uris: parse_string_set(
            &row.get::<String, _>("redirect_uris"),
            "clients.redirect_uris",
        )?,
        allowed_scopes: parse_string_set(
            &row.get::<String, _>("allowed_scopes"),
            "clients.allowed_scopes",
        )?,
        response_types: parse_string_set(
            &row.get::<String, _>("response_types"),
            "clients.response_types",
        )?,
        grant_types: parse_string_set(
            &row.get::<String, _>("grant_types"),
            "clients.grant_types",
        )?,
        token_endpoint_auth_method: row.get("token_endpoint_auth_method"),
        id_token_signed_response_alg: row.get("id_token_signed_response_alg"),
        require_pkce: row.get("require_pkce"),
        allow_offline_access: row.get("allow_offline_access"),
        access_token_timeout: row.get("access_token_timeout"),
        refresh_token_timeout: row.get("refresh_token_timeout"),
        created_at: parse_timestamp(row.get("created_at"), "clients.created_at")?,
    })
}

impl Database {
    /// Register a new client
    ///
    /// # Errors
    /// Returns an error if the insert fails
    pub async fn create_client(&self, client: &Client) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO clients (id, title, description, client_secret, client_type,
                                 redirect_uris, allowed_scopes, response_types, grant_types,
                                 token_endpoint_auth_method, id_token_signed_response_alg,
                                 require_pkce, allow_offline_access,
                                 access_token_timeout, refresh_token_timeout, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ",
        )
        .bind(client.id.to_string())
        .bind(&client.title)
        .bind(&client.description)
        .bind(&client.client_secret)
        .bind(client.client_type.as_str())
        .bind(encode_string_set(&client.redirect_uris))
        .bind(encode_string_set(&client.allowed_scopes))
        .bind(encode_string_set(&client.response_types))
        .bind(encode_string_set(&client.grant_types))
        .bind(&client.token_endpoint_auth_method)
        .bind(&client.id_token_signed_response_alg)
        .bind(client.require_pkce)
        .bind(client.allow_offline_access)
        .bind(client.access_token_timeout)
        .bind(client.refresh_token_timeout)
        .bind(client.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create client: {e}")))?;

        Ok(())
    }

    /// Get a client by id
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_client(&self, client_id: Uuid) -> AppResult<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = $1")
            .bind(client_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to query client: {e}")))?;

        row.as_ref().map(row_to_client).transpose()
    }
}
