// ABOUTME: JWT issuance and verification: access tokens and OIDC ID tokens
// ABOUTME: RS256 with kid from the active key pair, HS256 fallback when none exists
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! # Token Issuance
//!
//! Access tokens are minimal JWTs (`sub`, `exp`, `iat`). ID tokens carry the
//! OIDC claim set; `at_hash` and `c_hash` are the base64url encoding of the
//! left half of the SHA-256 digest of the access token and code respectively.
//! Extra claims attached to the authorization request are merged last and win
//! over computed claims.

use crate::config::OidcConfig;
use crate::errors::{AppError, AppResult};
use crate::keys::{KeyManager, SigningContext};
use crate::models::{Client, User};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: String,
    /// Expiry as unix seconds
    pub exp: i64,
    /// Issued-at as unix seconds
    pub iat: i64,
}

/// Inputs for building an ID token
pub struct IdTokenParams<'a> {
    /// Authenticated user
    pub user: &'a User,
    /// Audience client
    pub client: &'a Client,
    /// Effective granted scope
    pub scope: &'a BTreeSet<String>,
    /// Nonce from the authorization request
    pub nonce: Option<&'a str>,
    /// When the user authenticated
    pub auth_time: DateTime<Utc>,
    /// Access token issued alongside; produces `at_hash`
    pub access_token: Option<&'a str>,
    /// Authorization code issued alongside; produces `c_hash`
    pub code: Option<&'a str>,
    /// Extra claims attached to the authorization; merged last
    pub extra_claims: Option<&'a Map<String, Value>>,
}

/// Signs and verifies the server's JWTs
#[derive(Clone)]
pub struct TokenIssuer {
    key_manager: KeyManager,
    oidc: OidcConfig,
}

impl TokenIssuer {
    /// Create an issuer over the given key manager and OIDC settings
    #[must_use]
    pub const fn new(key_manager: KeyManager, oidc: OidcConfig) -> Self {
        Self { key_manager, oidc }
    }

    /// Issuer value as it appears in tokens
    #[must_use]
    pub fn issuer(&self) -> String {
        self.oidc.issuer()
    }

    /// Sign an access token for the given subject (a user id, or the client
    /// id for `client_credentials` grants)
    ///
    /// # Errors
    /// Returns an error if key resolution or signing fails
    pub async fn issue_access_token(&self, subject: &str, ttl_secs: i64) -> AppResult<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: subject.to_string(),
            exp: now.timestamp() + ttl_secs,
            iat: now.timestamp(),
        };
        self.sign(&claims).await
    }

    /// Assemble and sign an ID token
    ///
    /// # Errors
    /// Returns an error if key resolution or signing fails
    pub async fn issue_id_token(&self, params: IdTokenParams<'_>) -> AppResult<String> {
        let now = Utc::now();
        let mut claims = Map::new();

        claims.insert("iss".into(), Value::String(self.issuer()));
        claims.insert("sub".into(), Value::String(params.user.id.to_string()));
        claims.insert(
            "aud".into(),
            Value::String(params.client.id.to_string()),
        );
        claims.insert(
            "exp".into(),
            Value::from(now.timestamp() + params.client.access_token_timeout),
        );
        claims.insert("iat".into(), Value::from(now.timestamp()));
        claims.insert("auth_time".into(), Value::from(params.auth_time.timestamp()));

        if let Some(nonce) = params.nonce {
            claims.insert("nonce".into(), Value::String(nonce.to_string()));
        }

        if params.client.allowed_scopes.contains("profile") {
            if let Some(full_name) = &params.user.full_name {
                claims.insert("name".into(), Value::String(full_name.clone()));
            }
            claims.insert(
                "preferred_username".into(),
                Value::String(params.user.username.clone()),
            );
        }

        if params.client.allowed_scopes.contains("email") {
            claims.insert("email".into(), Value::String(params.user.email.clone()));
            claims.insert("email_verified".into(), Value::Bool(params.user.is_verified));
        }

        if let Some(access_token) = params.access_token {
            claims.insert("at_hash".into(), Value::String(half_hash(access_token)));
        }
        if let Some(code) = params.code {
            claims.insert("c_hash".into(), Value::String(half_hash(code)));
        }

        // Request-attached claims win over everything computed above
        if let Some(extra) = params.extra_claims {
            for (key, value) in extra {
                claims.insert(key.clone(), value.clone());
            }
        }

        let claims = Value::Object(claims);

        // The client's registered algorithm decides; RS256 clients follow
        // the signing context and fall back to HS256 when no key pair exists
        if params.client.id_token_signed_response_alg == "HS256" {
            self.sign_hs256(&claims)
        } else {
            self.sign(&claims).await
        }
    }

    /// Sign arbitrary claims under the current signing context
    async fn sign<T: Serialize>(&self, claims: &T) -> AppResult<String> {
        match self.key_manager.signing_context().await? {
            SigningContext::Rsa(key_pair) => {
                let mut header = Header::new(Algorithm::RS256);
                header.kid = Some(key_pair.kid());
                let encoding_key = key_pair.encoding_key()?;
                encode(&header, claims, &encoding_key)
                    .map_err(|e| AppError::internal(format!("Failed to sign RS256 JWT: {e}")))
            }
            SigningContext::HmacFallback => self.sign_hs256(claims),
        }
    }

    /// Sign claims with HS256 and the server-wide secret
    fn sign_hs256<T: Serialize>(&self, claims: &T) -> AppResult<String> {
        let header = Header::new(Algorithm::HS256);
        let encoding_key = jsonwebtoken::EncodingKey::from_secret(self.oidc.jwt_secret.as_bytes());
        encode(&header, claims, &encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign HS256 JWT: {e}")))
    }

    /// Verify an access token's signature and expiry.
    /// The key is selected by the `kid` header; tokens without a kid are
    /// checked against the HS256 fallback secret.
    ///
    /// # Errors
    /// Returns `AuthInvalid` when the token is malformed, signed by an
    /// unknown key, or expired
    pub async fn verify_access_token(&self, token: &str) -> AppResult<AccessClaims> {
        let header = decode_header(token)
            .map_err(|e| AppError::auth_invalid(format!("Malformed token: {e}")))?;

        let (decoding_key, algorithm) = match header.kid {
            Some(kid) => {
                let key_pair = self
                    .key_manager
                    .get_by_kid(&kid)
                    .await?
                    .ok_or_else(|| AppError::auth_invalid(format!("Unknown key ID: {kid}")))?;
                (key_pair.decoding_key()?, Algorithm::RS256)
            }
            None => (
                DecodingKey::from_secret(self.oidc.jwt_secret.as_bytes()),
                Algorithm::HS256,
            ),
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;

        let data = decode::<AccessClaims>(token, &decoding_key, &validation)
            .map_err(|e| AppError::auth_invalid(format!("Token verification failed: {e}")))?;

        Ok(data.claims)
    }
}

/// base64url encoding (no padding) of the left half of the SHA-256 digest.
/// Used for the OIDC `at_hash` and `c_hash` claims with RS256/HS256.
#[must_use]
pub fn half_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_hash_uses_left_half_of_digest() {
        let digest = Sha256::digest(b"token-value");
        let expected = URL_SAFE_NO_PAD.encode(&digest[..16]);
        assert_eq!(half_hash("token-value"), expected);
    }

    #[test]
    fn test_half_hash_is_deterministic() {
        assert_eq!(half_hash("abc"), half_hash("abc"));
        assert_ne!(half_hash("abc"), half_hash("abd"));
    }
}
