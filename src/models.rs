// ABOUTME: Core data models for the OIDC authorization server
// ABOUTME: Users, clients, signing key pairs, authorization codes, refresh tokens, consents
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! Data models persisted by the authorization server.
//!
//! Access tokens are deliberately absent: they are stateless signed JWTs and
//! only their revocation is persisted, as a blacklist entry with a TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A registered end user (consumed by the OIDC core, owned elsewhere)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,
    /// Email address
    pub email: String,
    /// Login name
    pub username: String,
    /// Bcrypt password hash
    #[serde(skip_serializing)]
    pub hashed_password: String,
    /// Display name
    pub full_name: Option<String>,
    /// Whether this account may log in
    pub is_active: bool,
    /// Whether the email address has been verified
    pub is_verified: bool,
    /// When this account was created
    pub created_at: DateTime<Utc>,
}

/// Whether a client can keep its secret confidential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Server-side application that can hold a secret
    Confidential,
    /// Browser or native application that cannot
    Public,
}

impl ClientType {
    /// Parse from the stored string form
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "public" => Self::Public,
            _ => Self::Confidential,
        }
    }

    /// String form used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confidential => "confidential",
            Self::Public => "public",
        }
    }
}

/// A registered OAuth2/OIDC client (consumed by the OIDC core, owned elsewhere)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier
    pub id: Uuid,
    /// Human-readable name shown on the consent page
    pub title: String,
    /// Optional description
    pub description: Option<String>,
    /// Client secret for confidential clients
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Confidential or public
    pub client_type: ClientType,
    /// Registered redirect URIs; authorization requests must use one of these
    pub redirect_uris: Vec<String>,
    /// Scopes this client may request
    pub allowed_scopes: BTreeSet<String>,
    /// Response types this client may use at the authorization endpoint
    pub response_types: BTreeSet<String>,
    /// Grant types this client may use at the token endpoint
    pub grant_types: BTreeSet<String>,
    /// How the client authenticates at the token endpoint
    /// (`client_secret_basic`, `client_secret_post`, or `none`)
    pub token_endpoint_auth_method: String,
    /// Signing algorithm for ID tokens issued to this client
    pub id_token_signed_response_alg: String,
    /// Whether authorization requests must carry a PKCE challenge
    pub require_pkce: bool,
    /// Whether this client may obtain refresh tokens via `offline_access`
    pub allow_offline_access: bool,
    /// Access token lifetime in seconds
    pub access_token_timeout: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_timeout: i64,
    /// When this client was registered
    pub created_at: DateTime<Utc>,
}

/// An asymmetric signing key pair for JWT issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// Unique key identifier; its string form is the JWT `kid`
    pub id: Uuid,
    /// Signing algorithm, e.g. "RS256"
    pub algorithm: String,
    /// PEM-encoded public key
    pub public_key: String,
    /// PEM-encoded private key
    #[serde(skip_serializing)]
    pub private_key: String,
    /// Whether this key signs newly issued tokens. At most one key is active;
    /// inactive keys remain valid for verification.
    pub is_active: bool,
    /// When this key pair was generated
    pub created_at: DateTime<Utc>,
}

impl KeyPair {
    /// JWT `kid` header value for this key
    #[must_use]
    pub fn kid(&self) -> String {
        self.id.to_string()
    }
}

/// PKCE code challenge transformation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    /// Verifier is compared to the challenge verbatim
    Plain,
    /// Challenge is `base64url(sha256(verifier))` without padding
    S256,
}

impl CodeChallengeMethod {
    /// Parse the wire form; anything other than "plain" or "S256" is rejected
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "S256" => Some(Self::S256),
            _ => None,
        }
    }

    /// Wire/storage form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

/// A single-use authorization code awaiting exchange at the token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Row identifier
    pub id: Uuid,
    /// The opaque code value handed to the client
    pub code: String,
    /// Client the code was issued to
    pub client_id: Uuid,
    /// User who granted the authorization
    pub user_id: Uuid,
    /// Redirect URI the code was bound to; must match exactly at exchange
    pub redirect_uri: String,
    /// Space-separated granted scope
    pub scope: String,
    /// OIDC nonce to replay into the ID token
    pub nonce: Option<String>,
    /// When the user authenticated
    pub auth_time: DateTime<Utc>,
    /// Expiry; codes are short-lived
    pub expires_at: DateTime<Utc>,
    /// PKCE challenge, if the client supplied one
    pub code_challenge: Option<String>,
    /// PKCE challenge method
    pub code_challenge_method: Option<CodeChallengeMethod>,
    /// Whether the code has been redeemed; a code is valid iff
    /// `!used && expires_at > now`
    pub used: bool,
    /// Extra claims to merge into the ID token at exchange
    pub claims: Option<serde_json::Value>,
    /// When the code was created
    pub created_at: DateTime<Utc>,
}

/// A long-lived refresh token, rotated on use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Row identifier
    pub id: Uuid,
    /// The opaque token value handed to the client
    pub token: String,
    /// Client the token was issued to
    pub client_id: Uuid,
    /// User the token acts for
    pub user_id: Uuid,
    /// Space-separated granted scope
    pub scope: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// Whether the token has been revoked; valid iff
    /// `!revoked && expires_at > now`
    pub revoked: bool,
    /// When the token was created
    pub created_at: DateTime<Utc>,
}

/// A user's recorded approval of scopes for a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consent {
    /// Row identifier
    pub id: Uuid,
    /// Consenting user
    pub user_id: Uuid,
    /// Client the consent applies to
    pub client_id: Uuid,
    /// Approved scopes
    pub scopes: BTreeSet<String>,
    /// At most one row is active per (user, client); recording new consent
    /// deactivates the prior row and inserts the union. Deactivated rows are
    /// retained for audit.
    pub is_active: bool,
    /// When this consent row was created
    pub created_at: DateTime<Utc>,
}

/// Parse a space-separated scope string into a set
#[must_use]
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope
        .split_whitespace()
        .map(std::string::ToString::to_string)
        .collect()
}

/// Join a scope set back into the canonical space-separated form
#[must_use]
pub fn join_scopes(scopes: &BTreeSet<String>) -> String {
    scopes
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scopes_splits_on_whitespace() {
        let scopes = parse_scopes("openid  profile email");
        assert_eq!(scopes.len(), 3);
        assert!(scopes.contains("openid"));
        assert!(scopes.contains("profile"));
        assert!(scopes.contains("email"));
    }

    #[test]
    fn test_parse_scopes_empty() {
        assert!(parse_scopes("").is_empty());
        assert!(parse_scopes("   ").is_empty());
    }

    #[test]
    fn test_join_scopes_is_sorted_and_stable() {
        let scopes = parse_scopes("profile openid email");
        assert_eq!(join_scopes(&scopes), "email openid profile");
    }

    #[test]
    fn test_code_challenge_method_parse() {
        assert_eq!(
            CodeChallengeMethod::parse("S256"),
            Some(CodeChallengeMethod::S256)
        );
        assert_eq!(
            CodeChallengeMethod::parse("plain"),
            Some(CodeChallengeMethod::Plain)
        );
        assert_eq!(CodeChallengeMethod::parse("s256"), None);
    }
}
