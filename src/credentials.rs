// ABOUTME: Opaque credential issuance and redemption: authorization codes, refresh tokens
// ABOUTME: Also fronts the access-token blacklist for stateless JWT revocation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use crate::blacklist::TokenBlacklist;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{AuthorizationCode, CodeChallengeMethod, RefreshToken};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use uuid::Uuid;

/// Entropy for authorization codes
const AUTH_CODE_BYTES: usize = 32;

/// Entropy for refresh tokens. Refresh tokens are deliberately longer than
/// codes; the revocation endpoint uses length to tell them apart.
const REFRESH_TOKEN_BYTES: usize = 48;

/// Parameters for issuing an authorization code
#[derive(Debug, Clone)]
pub struct AuthCodeParams {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: String,
    pub nonce: Option<String>,
    pub auth_time: DateTime<Utc>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub claims: Option<serde_json::Value>,
    pub ttl_secs: i64,
}

/// Issues and redeems the server's opaque credentials
#[derive(Clone)]
pub struct CredentialStore {
    database: Database,
    blacklist: Arc<dyn TokenBlacklist>,
}

impl CredentialStore {
    /// Create a store over the given database and blacklist
    #[must_use]
    pub fn new(database: Database, blacklist: Arc<dyn TokenBlacklist>) -> Self {
        Self {
            database,
            blacklist,
        }
    }

    /// Generate a cryptographically random base64url string
    fn generate_opaque(len: usize) -> AppResult<String> {
        let rng = SystemRandom::new();
        let mut bytes = vec![0u8; len];
        rng.fill(&mut bytes)
            .map_err(|_| AppError::internal("Failed to generate random bytes"))?;
        Ok(URL_SAFE_NO_PAD.encode(&bytes))
    }

    /// Issue and persist a single-use authorization code
    ///
    /// # Errors
    /// Returns an error if generation or storage fails
    pub async fn issue_auth_code(&self, params: AuthCodeParams) -> AppResult<AuthorizationCode> {
        let now = Utc::now();
        let code = AuthorizationCode {
            id: Uuid::new_v4(),
            code: Self::generate_opaque(AUTH_CODE_BYTES)?,
            client_id: params.client_id,
            user_id: params.user_id,
            redirect_uri: params.redirect_uri,
            scope: params.scope,
            nonce: params.nonce,
            auth_time: params.auth_time,
            expires_at: now + Duration::seconds(params.ttl_secs),
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
            used: false,
            claims: params.claims,
            created_at: now,
        };

        self.database.insert_auth_code(&code).await?;
        Ok(code)
    }

    /// Redeem an authorization code. Exactly one of any concurrent
    /// redemptions succeeds; all others see `None`.
    ///
    /// # Errors
    /// Returns an error if a query fails
    pub async fn consume_auth_code(
        &self,
        code: &str,
        client_id: Uuid,
        redirect_uri: &str,
    ) -> AppResult<Option<AuthorizationCode>> {
        self.database
            .consume_auth_code(code, client_id, redirect_uri, Utc::now())
            .await
    }

    /// Issue and persist a refresh token
    ///
    /// # Errors
    /// Returns an error if generation or storage fails
    pub async fn issue_refresh_token(
        &self,
        client_id: Uuid,
        user_id: Uuid,
        scope: &str,
        ttl_secs: i64,
    ) -> AppResult<RefreshToken> {
        let now = Utc::now();
        let token = RefreshToken {
            id: Uuid::new_v4(),
            token: Self::generate_opaque(REFRESH_TOKEN_BYTES)?,
            client_id,
            user_id,
            scope: scope.to_string(),
            expires_at: now + Duration::seconds(ttl_secs),
            revoked: false,
            created_at: now,
        };

        self.database.insert_refresh_token(&token).await?;
        Ok(token)
    }

    /// Look up a refresh token without consuming it
    ///
    /// # Errors
    /// Returns an error if the query fails
    pub async fn get_valid_refresh_token(
        &self,
        token: &str,
        client_id: Uuid,
    ) -> AppResult<Option<RefreshToken>> {
        self.database
            .get_valid_refresh_token(token, client_id, Utc::now())
            .await
    }

    /// Consume a refresh token for rotation
    ///
    /// # Errors
    /// Returns an error if a query fails
    pub async fn consume_refresh_token(
        &self,
        token: &str,
        client_id: Uuid,
    ) -> AppResult<Option<RefreshToken>> {
        self.database
            .consume_refresh_token(token, client_id, Utc::now())
            .await
    }

    /// Revoke a single refresh token
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_refresh_token(&self, token: &str) -> AppResult<bool> {
        self.database.revoke_refresh_token(token).await
    }

    /// Revoke all live refresh tokens for a user, optionally per client
    ///
    /// # Errors
    /// Returns an error if the update fails
    pub async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        client_id: Option<Uuid>,
    ) -> AppResult<u64> {
        self.database
            .revoke_user_refresh_tokens(user_id, client_id)
            .await
    }

    /// Blacklist an access token for the remainder of its lifetime
    ///
    /// # Errors
    /// Returns an error if the blacklist write fails
    pub async fn revoke_access_token(&self, token: &str, ttl_secs: u64) -> AppResult<()> {
        self.blacklist.revoke(token, ttl_secs).await
    }

    /// Check whether an access token has been blacklisted
    ///
    /// # Errors
    /// Returns an error if the blacklist read fails
    pub async fn is_access_token_revoked(&self, token: &str) -> AppResult<bool> {
        self.blacklist.is_revoked(token).await
    }

    /// Drop expired codes and refresh tokens. Returns (codes, tokens) removed.
    ///
    /// # Errors
    /// Returns an error if a delete fails
    pub async fn purge_expired(&self) -> AppResult<(u64, u64)> {
        let now = Utc::now();
        let codes = self.database.purge_expired_auth_codes(now).await?;
        let tokens = self.database.purge_expired_refresh_tokens(now).await?;
        Ok((codes, tokens))
    }
}
