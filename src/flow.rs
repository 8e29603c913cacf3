// ABOUTME: Authorization flow engine: authorize walk, consent decisions, token grants
// ABOUTME: Owns the direct-vs-redirect error delivery rule and PKCE verification
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! # Authorization Flow Engine
//!
//! Drives the authorization-code, implicit, and hybrid flows plus the token
//! endpoint grants. Protocol errors are values here, not faults: before the
//! redirect URI is validated they are delivered as direct JSON, afterwards as
//! redirect parameters. The token endpoint always answers directly.

use crate::config::TokenTtlConfig;
use crate::consent::ConsentLedger;
use crate::credentials::{AuthCodeParams, CredentialStore};
use crate::database::Database;
use crate::errors::AppResult;
use crate::models::{join_scopes, parse_scopes, Client, ClientType, CodeChallengeMethod, User};
use crate::tokens::{IdTokenParams, TokenIssuer};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The seven response_type combinations this server supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// `code` — authorization code flow
    Code,
    /// `token` — implicit, access token only
    Token,
    /// `id_token` — implicit, ID token only
    IdToken,
    /// `code token` — hybrid
    CodeToken,
    /// `code id_token` — hybrid
    CodeIdToken,
    /// `token id_token` — implicit, both tokens
    TokenIdToken,
    /// `code token id_token` — hybrid, everything
    CodeTokenIdToken,
}

impl ResponseType {
    /// Whether an authorization code is issued
    #[must_use]
    pub const fn includes_code(self) -> bool {
        matches!(
            self,
            Self::Code | Self::CodeToken | Self::CodeIdToken | Self::CodeTokenIdToken
        )
    }

    /// Whether an access token is issued from the authorization endpoint
    #[must_use]
    pub const fn includes_token(self) -> bool {
        matches!(
            self,
            Self::Token | Self::CodeToken | Self::TokenIdToken | Self::CodeTokenIdToken
        )
    }

    /// Whether an ID token is issued from the authorization endpoint
    #[must_use]
    pub const fn includes_id_token(self) -> bool {
        matches!(
            self,
            Self::IdToken | Self::CodeIdToken | Self::TokenIdToken | Self::CodeTokenIdToken
        )
    }

    /// Token-bearing responses go in the fragment; `code` alone in the query
    #[must_use]
    pub const fn uses_fragment(self) -> bool {
        self.includes_token() || self.includes_id_token()
    }

    /// Canonical wire form, as registered on clients
    #[must_use]
    pub const fn wire_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
            Self::IdToken => "id_token",
            Self::CodeToken => "code token",
            Self::CodeIdToken => "code id_token",
            Self::TokenIdToken => "token id_token",
            Self::CodeTokenIdToken => "code token id_token",
        }
    }
}

impl FromStr for ResponseType {
    type Err = ();

    /// Order-insensitive parse over the space-separated tokens
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut code = false;
        let mut token = false;
        let mut id_token = false;

        for part in s.split_whitespace() {
            match part {
                "code" => code = true,
                "token" => token = true,
                "id_token" => id_token = true,
                _ => return Err(()),
            }
        }

        match (code, token, id_token) {
            (true, false, false) => Ok(Self::Code),
            (false, true, false) => Ok(Self::Token),
            (false, false, true) => Ok(Self::IdToken),
            (true, true, false) => Ok(Self::CodeToken),
            (true, false, true) => Ok(Self::CodeIdToken),
            (false, true, true) => Ok(Self::TokenIdToken),
            (true, true, true) => Ok(Self::CodeTokenIdToken),
            (false, false, false) => Err(()),
        }
    }
}

/// OAuth2/OIDC protocol error, delivered as JSON or redirect parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolError {
    /// RFC 6749 error code
    pub error: String,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ProtocolError {
    fn new(error: &str, description: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.into()),
        }
    }

    /// Client unknown or authentication failed
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new("invalid_client", description)
    }

    /// Request is malformed or missing a required parameter
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description)
    }

    /// Requested scope exceeds what the client may have
    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new("invalid_scope", description)
    }

    /// response_type not supported for this client
    pub fn unsupported_response_type(description: impl Into<String>) -> Self {
        Self::new("unsupported_response_type", description)
    }

    /// Grant (code, refresh token, verifier) is invalid or expired
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description)
    }

    /// grant_type not supported
    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::new("unsupported_grant_type", description)
    }

    /// Client may not use this grant type
    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new("unauthorized_client", description)
    }

    /// Consent is missing and cannot be prompted for
    pub fn consent_required(description: impl Into<String>) -> Self {
        Self::new("consent_required", description)
    }

    /// Authentication is missing and cannot be prompted for
    pub fn login_required(description: impl Into<String>) -> Self {
        Self::new("login_required", description)
    }

    /// The user denied the authorization request
    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new("access_denied", description)
    }

    /// HTTP status for direct delivery
    #[must_use]
    pub fn http_status(&self) -> u16 {
        if self.error == "invalid_client" {
            401
        } else {
            400
        }
    }
}

/// Query parameters of an authorization request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Result of walking an authorization request
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// Error before redirect-URI trust is established; deliver as JSON
    DirectError(ProtocolError),
    /// Send the user agent to this URL (success or redirect-delivered error)
    Redirect(String),
    /// No authenticated session; send to login, then back here
    LoginRequired,
    /// Session exists but consent is missing; render the consent page
    ConsentRequired {
        client: Box<Client>,
        scopes: BTreeSet<String>,
    },
}

/// Form body of a token endpoint request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Successful token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Token endpoint result: protocol errors are values, not faults
pub type TokenResult = Result<TokenResponse, ProtocolError>;

/// Drives the protocol; holds the services it orchestrates
#[derive(Clone)]
pub struct FlowEngine {
    database: Database,
    credentials: CredentialStore,
    consent: ConsentLedger,
    issuer: TokenIssuer,
    ttl: TokenTtlConfig,
}

impl FlowEngine {
    /// Assemble the engine from its collaborators
    #[must_use]
    pub const fn new(
        database: Database,
        credentials: CredentialStore,
        consent: ConsentLedger,
        issuer: TokenIssuer,
        ttl: TokenTtlConfig,
    ) -> Self {
        Self {
            database,
            credentials,
            consent,
            issuer,
            ttl,
        }
    }

    /// Walk an authorization request for the (possibly absent) session user
    ///
    /// # Errors
    /// Returns an error only for infrastructure faults; protocol errors are
    /// folded into the outcome
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        session_user: Option<&User>,
    ) -> AppResult<AuthorizeOutcome> {
        // Until the redirect URI is validated, errors must not redirect
        let Some(client) = self.lookup_client(request.client_id.as_deref()).await? else {
            return Ok(AuthorizeOutcome::DirectError(ProtocolError::invalid_client(
                "Unknown client",
            )));
        };

        let Some(redirect_uri) = request
            .redirect_uri
            .as_deref()
            .filter(|uri| client.redirect_uris.iter().any(|r| r == uri))
        else {
            warn!(client_id = %client.id, "Authorization request with unregistered redirect_uri");
            return Ok(AuthorizeOutcome::DirectError(
                ProtocolError::invalid_request("Invalid redirect_uri"),
            ));
        };

        let state = request.state.as_deref();

        let response_type = match request
            .response_type
            .as_deref()
            .unwrap_or_default()
            .parse::<ResponseType>()
        {
            Ok(rt) if client.response_types.contains(rt.wire_str()) => rt,
            _ => {
                return Ok(error_redirect(
                    redirect_uri,
                    &ProtocolError::unsupported_response_type(
                        "response_type not allowed for this client",
                    ),
                    state,
                    false,
                ));
            }
        };
        let fragment = response_type.uses_fragment();

        let requested_scopes = parse_scopes(request.scope.as_deref().unwrap_or_default());
        if !requested_scopes.is_subset(&client.allowed_scopes) {
            return Ok(error_redirect(
                redirect_uri,
                &ProtocolError::invalid_scope("Requested scope exceeds the client's allowed scopes"),
                state,
                fragment,
            ));
        }

        let prompt_none = request.prompt.as_deref() == Some("none");

        let Some(user) = session_user else {
            if prompt_none {
                return Ok(error_redirect(
                    redirect_uri,
                    &ProtocolError::login_required("No authenticated session"),
                    state,
                    fragment,
                ));
            }
            return Ok(AuthorizeOutcome::LoginRequired);
        };

        let code_challenge_method = match request.code_challenge_method.as_deref() {
            None => None,
            Some(raw) => match CodeChallengeMethod::parse(raw) {
                Some(method) => Some(method),
                None => {
                    return Ok(error_redirect(
                        redirect_uri,
                        &ProtocolError::invalid_request("Unknown code_challenge_method"),
                        state,
                        fragment,
                    ));
                }
            },
        };
        if client.require_pkce && request.code_challenge.is_none() {
            return Ok(error_redirect(
                redirect_uri,
                &ProtocolError::invalid_request("This client requires a PKCE code_challenge"),
                state,
                fragment,
            ));
        }
        // Challenge without a method defaults to plain
        let code_challenge_method = request
            .code_challenge
            .as_ref()
            .map(|_| code_challenge_method.unwrap_or(CodeChallengeMethod::Plain));

        if !self
            .consent
            .has_consented(user.id, client.id, &requested_scopes)
            .await?
        {
            if prompt_none {
                return Ok(error_redirect(
                    redirect_uri,
                    &ProtocolError::consent_required("Consent has not been granted"),
                    state,
                    fragment,
                ));
            }
            return Ok(AuthorizeOutcome::ConsentRequired {
                client: Box::new(client),
                scopes: requested_scopes,
            });
        }

        self.issue_authorize_response(
            &client,
            user,
            redirect_uri,
            response_type,
            &requested_scopes,
            code_challenge_method,
            request,
        )
        .await
    }

    /// Issue credentials per the response type and build the redirect
    #[allow(clippy::too_many_arguments)]
    async fn issue_authorize_response(
        &self,
        client: &Client,
        user: &User,
        redirect_uri: &str,
        response_type: ResponseType,
        scopes: &BTreeSet<String>,
        code_challenge_method: Option<CodeChallengeMethod>,
        request: &AuthorizeRequest,
    ) -> AppResult<AuthorizeOutcome> {
        let auth_time = Utc::now();
        let scope = join_scopes(scopes);

        let code = if response_type.includes_code() {
            let code = self
                .credentials
                .issue_auth_code(AuthCodeParams {
                    client_id: client.id,
                    user_id: user.id,
                    redirect_uri: redirect_uri.to_string(),
                    scope: scope.clone(),
                    nonce: request.nonce.clone(),
                    auth_time,
                    code_challenge: request.code_challenge.clone(),
                    code_challenge_method,
                    claims: None,
                    ttl_secs: self.ttl.auth_code_ttl_secs,
                })
                .await?;
            Some(code.code)
        } else {
            None
        };

        let access_token = if response_type.includes_token() {
            Some(
                self.issuer
                    .issue_access_token(&user.id.to_string(), client.access_token_timeout)
                    .await?,
            )
        } else {
            None
        };

        let id_token = if response_type.includes_id_token() {
            Some(
                self.issuer
                    .issue_id_token(IdTokenParams {
                        user,
                        client,
                        scope: scopes,
                        nonce: request.nonce.as_deref(),
                        auth_time,
                        access_token: access_token.as_deref(),
                        code: code.as_deref(),
                        extra_claims: None,
                    })
                    .await?,
            )
        } else {
            None
        };

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(code) = &code {
            params.push(("code", code.clone()));
        }
        if let Some(access_token) = &access_token {
            params.push(("access_token", access_token.clone()));
            params.push(("token_type", "bearer".to_string()));
            params.push(("expires_in", client.access_token_timeout.to_string()));
            params.push(("scope", scope.clone()));
        }
        if let Some(id_token) = &id_token {
            params.push(("id_token", id_token.clone()));
        }
        // state is echoed exactly as received; absent state becomes empty
        params.push(("state", request.state.clone().unwrap_or_default()));

        info!(
            client_id = %client.id,
            user_id = %user.id,
            response_type = response_type.wire_str(),
            "Authorization granted"
        );

        Ok(AuthorizeOutcome::Redirect(build_redirect(
            redirect_uri,
            &params,
            response_type.uses_fragment(),
        )))
    }

    /// Apply a consent form decision, then replay the authorization request
    ///
    /// # Errors
    /// Returns an error only for infrastructure faults
    pub async fn consent_decision(
        &self,
        request: &AuthorizeRequest,
        user: &User,
        approved: bool,
    ) -> AppResult<AuthorizeOutcome> {
        if approved {
            let Some(client) = self.lookup_client(request.client_id.as_deref()).await? else {
                return Ok(AuthorizeOutcome::DirectError(ProtocolError::invalid_client(
                    "Unknown client",
                )));
            };
            let scopes = parse_scopes(request.scope.as_deref().unwrap_or_default());
            self.consent.record_consent(user.id, client.id, &scopes).await?;
            info!(client_id = %client.id, user_id = %user.id, "Consent recorded");
            return self.authorize(request, Some(user)).await;
        }

        // Denial still follows the delivery rule: redirect only to a
        // registered redirect_uri
        let Some(client) = self.lookup_client(request.client_id.as_deref()).await? else {
            return Ok(AuthorizeOutcome::DirectError(ProtocolError::invalid_client(
                "Unknown client",
            )));
        };
        let Some(redirect_uri) = request
            .redirect_uri
            .as_deref()
            .filter(|uri| client.redirect_uris.iter().any(|r| r == uri))
        else {
            return Ok(AuthorizeOutcome::DirectError(
                ProtocolError::invalid_request("Invalid redirect_uri"),
            ));
        };

        let fragment = request
            .response_type
            .as_deref()
            .unwrap_or_default()
            .parse::<ResponseType>()
            .map(ResponseType::uses_fragment)
            .unwrap_or(false);

        info!(client_id = %client.id, user_id = %user.id, "Consent denied");
        Ok(error_redirect(
            redirect_uri,
            &ProtocolError::access_denied("The user denied the request"),
            request.state.as_deref(),
            fragment,
        ))
    }

    /// Handle a token endpoint request. `basic_credentials` comes from the
    /// Authorization header and wins over form credentials.
    ///
    /// # Errors
    /// Returns an error only for infrastructure faults
    pub async fn token(
        &self,
        request: &TokenRequest,
        basic_credentials: Option<(String, String)>,
    ) -> AppResult<TokenResult> {
        let (client_id, client_secret) = match basic_credentials {
            Some((id, secret)) => (Some(id), Some(secret)),
            None => (request.client_id.clone(), request.client_secret.clone()),
        };

        let Some(client) = self.lookup_client(client_id.as_deref()).await? else {
            return Ok(Err(ProtocolError::invalid_client("Unknown client")));
        };

        if client.client_type == ClientType::Confidential
            && client.token_endpoint_auth_method != "none"
        {
            let presented = client_secret.unwrap_or_default();
            if !constant_time_eq(&presented, &client.client_secret) {
                warn!(client_id = %client.id, "Client authentication failed");
                return Ok(Err(ProtocolError::invalid_client(
                    "Client authentication failed",
                )));
            }
        }

        match request.grant_type.as_deref() {
            Some("authorization_code") => self.grant_authorization_code(&client, request).await,
            Some("refresh_token") => self.grant_refresh_token(&client, request).await,
            Some("client_credentials") => self.grant_client_credentials(&client, request).await,
            other => {
                debug!(client_id = %client.id, grant_type = ?other, "Unsupported grant type");
                Ok(Err(ProtocolError::unsupported_grant_type(
                    "Unsupported grant_type",
                )))
            }
        }
    }

    /// The code is consumed before the PKCE verifier is checked, so a failed
    /// verification attempt burns the code.
    async fn grant_authorization_code(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> AppResult<TokenResult> {
        let (Some(code), Some(redirect_uri)) =
            (request.code.as_deref(), request.redirect_uri.as_deref())
        else {
            return Ok(Err(ProtocolError::invalid_request(
                "code and redirect_uri are required",
            )));
        };

        // Single-winner consume: a replayed code sees None here
        let Some(stored) = self
            .credentials
            .consume_auth_code(code, client.id, redirect_uri)
            .await?
        else {
            warn!(client_id = %client.id, "Authorization code rejected");
            return Ok(Err(ProtocolError::invalid_grant(
                "Authorization code is invalid, expired, or already used",
            )));
        };

        if let Some(challenge) = &stored.code_challenge {
            let method = stored
                .code_challenge_method
                .unwrap_or(CodeChallengeMethod::Plain);
            let verified = request
                .code_verifier
                .as_deref()
                .is_some_and(|verifier| verify_pkce(challenge, method, verifier));
            if !verified {
                warn!(client_id = %client.id, "PKCE verification failed");
                return Ok(Err(ProtocolError::invalid_grant(
                    "PKCE verification failed",
                )));
            }
        }

        let Some(user) = self.database.get_user(stored.user_id).await? else {
            return Ok(Err(ProtocolError::invalid_grant("Unknown user")));
        };

        let scopes = parse_scopes(&stored.scope);

        let access_token = self
            .issuer
            .issue_access_token(&user.id.to_string(), client.access_token_timeout)
            .await?;

        let refresh_token = if client.allow_offline_access && scopes.contains("offline_access") {
            Some(
                self.credentials
                    .issue_refresh_token(
                        client.id,
                        user.id,
                        &stored.scope,
                        client.refresh_token_timeout,
                    )
                    .await?
                    .token,
            )
        } else {
            None
        };

        let id_token = if scopes.contains("openid") {
            let extra_claims = stored.claims.as_ref().and_then(serde_json::Value::as_object);
            Some(
                self.issuer
                    .issue_id_token(IdTokenParams {
                        user: &user,
                        client,
                        scope: &scopes,
                        nonce: stored.nonce.as_deref(),
                        auth_time: stored.auth_time,
                        access_token: Some(&access_token),
                        code: Some(&stored.code),
                        extra_claims,
                    })
                    .await?,
            )
        } else {
            None
        };

        info!(client_id = %client.id, user_id = %user.id, "Authorization code exchanged");

        Ok(Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: client.access_token_timeout,
            refresh_token,
            id_token,
            scope: stored.scope,
        }))
    }

    async fn grant_refresh_token(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> AppResult<TokenResult> {
        let Some(raw_token) = request.refresh_token.as_deref() else {
            return Ok(Err(ProtocolError::invalid_request(
                "refresh_token is required",
            )));
        };

        let Some(stored) = self
            .credentials
            .get_valid_refresh_token(raw_token, client.id)
            .await?
        else {
            warn!(client_id = %client.id, "Refresh token rejected");
            return Ok(Err(ProtocolError::invalid_grant(
                "Refresh token is invalid, expired, or revoked",
            )));
        };

        let granted = parse_scopes(&stored.scope);

        // Scope may only narrow on refresh
        let effective = match request.scope.as_deref() {
            Some(requested) if !requested.trim().is_empty() => {
                let requested = parse_scopes(requested);
                if !requested.is_subset(&granted) {
                    return Ok(Err(ProtocolError::invalid_grant(
                        "Requested scope exceeds the original grant",
                    )));
                }
                requested
            }
            _ => granted,
        };

        let Some(user) = self.database.get_user(stored.user_id).await? else {
            return Ok(Err(ProtocolError::invalid_grant("Unknown user")));
        };

        // Rotation only applies to offline grants; one-off refreshes keep
        // the original token live
        let rotated = if effective.contains("offline_access") {
            if self
                .credentials
                .consume_refresh_token(raw_token, client.id)
                .await?
                .is_none()
            {
                return Ok(Err(ProtocolError::invalid_grant(
                    "Refresh token is invalid, expired, or revoked",
                )));
            }
            Some(
                self.credentials
                    .issue_refresh_token(
                        client.id,
                        user.id,
                        &join_scopes(&effective),
                        client.refresh_token_timeout,
                    )
                    .await?
                    .token,
            )
        } else {
            None
        };

        let access_token = self
            .issuer
            .issue_access_token(&user.id.to_string(), client.access_token_timeout)
            .await?;

        let id_token = if effective.contains("openid") {
            Some(
                self.issuer
                    .issue_id_token(IdTokenParams {
                        user: &user,
                        client,
                        scope: &effective,
                        nonce: None,
                        auth_time: Utc::now(),
                        access_token: Some(&access_token),
                        code: None,
                        extra_claims: None,
                    })
                    .await?,
            )
        } else {
            None
        };

        info!(client_id = %client.id, user_id = %user.id, rotated = rotated.is_some(), "Refresh grant issued");

        Ok(Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: client.access_token_timeout,
            refresh_token: rotated,
            id_token,
            scope: join_scopes(&effective),
        }))
    }

    async fn grant_client_credentials(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> AppResult<TokenResult> {
        if !client.grant_types.contains("client_credentials") {
            return Ok(Err(ProtocolError::unauthorized_client(
                "Client may not use the client_credentials grant",
            )));
        }

        let scopes = match request.scope.as_deref() {
            Some(requested) if !requested.trim().is_empty() => {
                let requested = parse_scopes(requested);
                if !requested.is_subset(&client.allowed_scopes) {
                    return Ok(Err(ProtocolError::invalid_scope(
                        "Requested scope exceeds the client's allowed scopes",
                    )));
                }
                requested
            }
            _ => client.allowed_scopes.clone(),
        };

        let access_token = self
            .issuer
            .issue_access_token(&client.id.to_string(), client.access_token_timeout)
            .await?;

        info!(client_id = %client.id, "Client credentials grant issued");

        Ok(Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: client.access_token_timeout,
            refresh_token: None,
            id_token: None,
            scope: join_scopes(&scopes),
        }))
    }

    /// Revoke a token. The hint, then a length heuristic, decides whether it
    /// is treated as a refresh token first; the endpoint always succeeds.
    /// Opaque refresh tokens are longer than 40 characters and never contain
    /// `.`, so dotted values (JWT access tokens of any length) go straight to
    /// the blacklist.
    ///
    /// # Errors
    /// Returns an error only for infrastructure faults
    pub async fn revoke(&self, token: &str, token_type_hint: Option<&str>) -> AppResult<()> {
        let looks_like_refresh = match token_type_hint {
            Some("refresh_token") => true,
            Some("access_token") => false,
            _ => token.len() > 40 && !token.contains('.'),
        };

        if looks_like_refresh && self.credentials.revoke_refresh_token(token).await? {
            debug!("Refresh token revoked");
            return Ok(());
        }

        // Blacklist for the configured access lifetime; the entry outlives
        // any remaining validity of the token
        self.credentials
            .revoke_access_token(token, self.ttl.access_token_ttl_secs.max(0) as u64)
            .await?;
        debug!("Access token blacklisted");
        Ok(())
    }

    /// End the user's session: revoke every live refresh token they hold
    ///
    /// # Errors
    /// Returns an error if the revocation fails
    pub async fn end_session(&self, user_id: Uuid) -> AppResult<u64> {
        let revoked = self
            .credentials
            .revoke_user_refresh_tokens(user_id, None)
            .await?;
        info!(user_id = %user_id, revoked, "Session ended");
        Ok(revoked)
    }

    async fn lookup_client(&self, client_id: Option<&str>) -> AppResult<Option<Client>> {
        let Some(raw) = client_id else {
            return Ok(None);
        };
        let Ok(id) = Uuid::parse_str(raw) else {
            return Ok(None);
        };
        self.database.get_client(id).await
    }
}

/// Verify a PKCE code verifier against the stored challenge
#[must_use]
pub fn verify_pkce(challenge: &str, method: CodeChallengeMethod, verifier: &str) -> bool {
    match method {
        CodeChallengeMethod::Plain => constant_time_eq(verifier, challenge),
        CodeChallengeMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(digest);
            constant_time_eq(&computed, challenge)
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Append parameters to a redirect URI, in the query or the fragment
fn build_redirect(redirect_uri: &str, params: &[(&str, String)], fragment: bool) -> String {
    let encoded = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    if fragment {
        format!("{redirect_uri}#{encoded}")
    } else if redirect_uri.contains('?') {
        format!("{redirect_uri}&{encoded}")
    } else {
        format!("{redirect_uri}?{encoded}")
    }
}

fn error_redirect(
    redirect_uri: &str,
    error: &ProtocolError,
    state: Option<&str>,
    fragment: bool,
) -> AuthorizeOutcome {
    let mut params: Vec<(&str, String)> = vec![("error", error.error.clone())];
    if let Some(description) = &error.error_description {
        params.push(("error_description", description.clone()));
    }
    params.push(("state", state.unwrap_or_default().to_string()));
    AuthorizeOutcome::Redirect(build_redirect(redirect_uri, &params, fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_type_parses_all_seven_combinations() {
        assert_eq!("code".parse(), Ok(ResponseType::Code));
        assert_eq!("token".parse(), Ok(ResponseType::Token));
        assert_eq!("id_token".parse(), Ok(ResponseType::IdToken));
        assert_eq!("code token".parse(), Ok(ResponseType::CodeToken));
        assert_eq!("code id_token".parse(), Ok(ResponseType::CodeIdToken));
        assert_eq!("token id_token".parse(), Ok(ResponseType::TokenIdToken));
        assert_eq!(
            "code token id_token".parse(),
            Ok(ResponseType::CodeTokenIdToken)
        );
    }

    #[test]
    fn test_response_type_is_order_insensitive() {
        assert_eq!(
            "id_token code".parse::<ResponseType>(),
            Ok(ResponseType::CodeIdToken)
        );
        assert_eq!(
            "id_token token code".parse::<ResponseType>(),
            Ok(ResponseType::CodeTokenIdToken)
        );
    }

    #[test]
    fn test_response_type_rejects_unknown_tokens() {
        assert!("codes".parse::<ResponseType>().is_err());
        assert!("code password".parse::<ResponseType>().is_err());
        assert!("".parse::<ResponseType>().is_err());
    }

    #[test]
    fn test_fragment_delivery() {
        assert!(!ResponseType::Code.uses_fragment());
        assert!(ResponseType::Token.uses_fragment());
        assert!(ResponseType::CodeIdToken.uses_fragment());
        assert!(ResponseType::CodeTokenIdToken.uses_fragment());
    }

    #[test]
    fn test_verify_pkce_s256_vector() {
        // base64url(sha256("abc123")) without padding
        let digest = Sha256::digest(b"abc123");
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        assert!(verify_pkce(&challenge, CodeChallengeMethod::S256, "abc123"));
        assert!(!verify_pkce(&challenge, CodeChallengeMethod::S256, "abc124"));
    }

    #[test]
    fn test_verify_pkce_plain() {
        assert!(verify_pkce("verifier", CodeChallengeMethod::Plain, "verifier"));
        assert!(!verify_pkce("verifier", CodeChallengeMethod::Plain, "other"));
    }

    #[test]
    fn test_build_redirect_query_and_fragment() {
        let params = vec![("code", "abc".to_string()), ("state", "x y".to_string())];
        assert_eq!(
            build_redirect("https://app/cb", &params, false),
            "https://app/cb?code=abc&state=x%20y"
        );
        assert_eq!(
            build_redirect("https://app/cb", &params, true),
            "https://app/cb#code=abc&state=x%20y"
        );
        assert_eq!(
            build_redirect("https://app/cb?k=1", &params, false),
            "https://app/cb?k=1&code=abc&state=x%20y"
        );
    }

    #[test]
    fn test_protocol_error_status() {
        assert_eq!(ProtocolError::invalid_client("x").http_status(), 401);
        assert_eq!(ProtocolError::invalid_grant("x").http_status(), 400);
    }
}
