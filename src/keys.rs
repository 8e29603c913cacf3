// ABOUTME: RSA signing key lifecycle: generation, rotation, JWKS rendering
// ABOUTME: Key pairs persist as PKCS#8 PEM; at most one key signs, all verify
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! # Signing Key Management
//!
//! RSA key pair generation for RS256 JWT signing, single-active rotation, and
//! JWKS rendering for public key distribution. Private keys never leave the
//! server; public keys are served from the JWKS endpoint.
//!
//! When no key pair exists, token signing falls back to HS256 with the
//! server-wide secret and JWKS is empty.

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::KeyPair;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::{
    pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RSA key size in bits for RS256
const RSA_KEY_SIZE: usize = 2048;

/// JWK (JSON Web Key) representation for the JWKS endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (always "RSA")
    pub kty: String,
    /// Public key use (always "sig")
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key ID for rotation tracking
    pub kid: String,
    /// Algorithm (RS256)
    pub alg: String,
    /// RSA modulus (base64url encoded, big-endian)
    pub n: String,
    /// RSA exponent (base64url encoded, big-endian)
    pub e: String,
}

/// JWKS (JSON Web Key Set) container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Array of public keys
    pub keys: Vec<JsonWebKey>,
}

/// How tokens are signed right now: the active RSA key pair, or the
/// server-wide HS256 secret when none exists
#[derive(Debug, Clone)]
pub enum SigningContext {
    /// RS256 with the active key pair
    Rsa(KeyPair),
    /// HS256 fallback with the shared secret
    HmacFallback,
}

/// Key pair lifecycle over the database
#[derive(Clone)]
pub struct KeyManager {
    database: Database,
}

impl KeyManager {
    /// Create a manager over the given database
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Generate a new RSA key pair and store it inactive
    ///
    /// # Errors
    /// Returns an error if generation, encoding, or storage fails
    pub async fn generate_key_pair(&self) -> AppResult<KeyPair> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_SIZE)
            .map_err(|e| AppError::internal(format!("Failed to generate RSA key: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| AppError::internal(format!("Failed to encode private key: {e}")))?
            .to_string();
        let public_pem = public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| AppError::internal(format!("Failed to encode public key: {e}")))?;

        let key_pair = KeyPair {
            id: Uuid::new_v4(),
            algorithm: "RS256".to_string(),
            public_key: public_pem,
            private_key: private_pem,
            is_active: false,
            created_at: Utc::now(),
        };

        self.database.insert_key_pair(&key_pair).await?;
        Ok(key_pair)
    }

    /// Make a key the single active signing key
    ///
    /// # Errors
    /// Returns an error if the key does not exist
    pub async fn activate(&self, key_id: Uuid) -> AppResult<()> {
        self.database.activate_key_pair(key_id).await
    }

    /// Delete a key pair; the active key is refused
    ///
    /// # Errors
    /// Returns an error if the key is active or does not exist
    pub async fn delete(&self, key_id: Uuid) -> AppResult<()> {
        self.database.delete_key_pair(key_id).await
    }

    /// Generate and activate a signing key if none is active.
    /// Returns the active key either way.
    ///
    /// # Errors
    /// Returns an error if generation or activation fails
    pub async fn bootstrap(&self) -> AppResult<KeyPair> {
        if let Some(active) = self.database.get_active_key_pair().await? {
            return Ok(active);
        }

        let key_pair = self.generate_key_pair().await?;
        self.activate(key_pair.id).await?;
        tracing::info!(kid = %key_pair.kid(), "Generated initial signing key");

        Ok(KeyPair {
            is_active: true,
            ..key_pair
        })
    }

    /// Resolve how tokens should be signed right now
    ///
    /// # Errors
    /// Returns an error if the lookup fails
    pub async fn signing_context(&self) -> AppResult<SigningContext> {
        Ok(match self.database.get_active_key_pair().await? {
            Some(key_pair) => SigningContext::Rsa(key_pair),
            None => SigningContext::HmacFallback,
        })
    }

    /// Look up a verification key by the JWT `kid` header value
    ///
    /// # Errors
    /// Returns an error if the lookup fails
    pub async fn get_by_kid(&self, kid: &str) -> AppResult<Option<KeyPair>> {
        let Ok(key_id) = Uuid::parse_str(kid) else {
            return Ok(None);
        };
        self.database.get_key_pair(key_id).await
    }

    /// List all stored key pairs, newest first
    ///
    /// # Errors
    /// Returns an error if the lookup fails
    pub async fn list(&self) -> AppResult<Vec<KeyPair>> {
        self.database.list_key_pairs().await
    }

    /// Render the JWKS document covering every stored key
    ///
    /// # Errors
    /// Returns an error if a stored public key fails to parse
    pub async fn jwks(&self) -> AppResult<JsonWebKeySet> {
        let key_pairs = self.database.list_key_pairs().await?;
        let keys = key_pairs
            .iter()
            .map(key_pair_to_jwk)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(JsonWebKeySet { keys })
    }
}

/// Convert a stored key pair's public half to JWK format
fn key_pair_to_jwk(key_pair: &KeyPair) -> AppResult<JsonWebKey> {
    let public_key = RsaPublicKey::from_public_key_pem(&key_pair.public_key)
        .map_err(|e| AppError::internal(format!("Failed to parse stored public key: {e}")))?;

    let n_bytes = public_key.n().to_bytes_be();
    let e_bytes = public_key.e().to_bytes_be();

    Ok(JsonWebKey {
        kty: "RSA".to_string(),
        key_use: "sig".to_string(),
        kid: key_pair.kid(),
        alg: key_pair.algorithm.clone(),
        n: URL_SAFE_NO_PAD.encode(n_bytes),
        e: URL_SAFE_NO_PAD.encode(e_bytes),
    })
}

impl KeyPair {
    /// Encoding key for JWT signing
    ///
    /// # Errors
    /// Returns an error if the stored PEM is not a valid RSA private key
    pub fn encoding_key(&self) -> AppResult<EncodingKey> {
        EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| AppError::internal(format!("Failed to build encoding key: {e}")))
    }

    /// Decoding key for JWT verification
    ///
    /// # Errors
    /// Returns an error if the stored PEM is not a valid RSA public key
    pub fn decoding_key(&self) -> AppResult<DecodingKey> {
        DecodingKey::from_rsa_pem(self.public_key.as_bytes())
            .map_err(|e| AppError::internal(format!("Failed to build decoding key: {e}")))
    }
}
