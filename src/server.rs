// ABOUTME: Shared server state and router assembly
// ABOUTME: ServerResources wires the database, keys, credentials, consent, and flow together
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use crate::blacklist::TokenBlacklist;
use crate::config::ServerConfig;
use crate::consent::ConsentLedger;
use crate::credentials::CredentialStore;
use crate::database::Database;
use crate::flow::FlowEngine;
use crate::keys::KeyManager;
use crate::routes::oidc;
use crate::tokens::TokenIssuer;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Shared state handed to every handler
pub struct ServerResources {
    /// Database access
    pub database: Database,
    /// Signing key lifecycle
    pub key_manager: KeyManager,
    /// Opaque credential issuance and the access-token blacklist
    pub credentials: CredentialStore,
    /// Consent decisions
    pub consent: ConsentLedger,
    /// JWT issuance and verification
    pub issuer: TokenIssuer,
    /// Protocol engine
    pub flow: FlowEngine,
    /// Server configuration
    pub config: ServerConfig,
}

impl ServerResources {
    /// Wire up the full service graph over a database and blacklist
    #[must_use]
    pub fn new(
        database: Database,
        blacklist: Arc<dyn TokenBlacklist>,
        config: ServerConfig,
    ) -> Self {
        let key_manager = KeyManager::new(database.clone());
        let credentials = CredentialStore::new(database.clone(), blacklist);
        let consent = ConsentLedger::new(database.clone());
        let issuer = TokenIssuer::new(key_manager.clone(), config.oidc.clone());
        let flow = FlowEngine::new(
            database.clone(),
            credentials.clone(),
            consent.clone(),
            issuer.clone(),
            config.oidc.ttl.clone(),
        );

        Self {
            database,
            key_manager,
            credentials,
            consent,
            issuer,
            flow,
            config,
        }
    }
}

/// Build the router over shared resources
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/.well-known/openid-configuration", get(oidc::discovery))
        .route("/oidc/jwks", get(oidc::jwks))
        .route("/oidc/authorize", get(oidc::authorize))
        .route(
            "/oidc/consent",
            get(oidc::consent_page).post(oidc::consent_submit),
        )
        .route("/oidc/token", post(oidc::token))
        .route("/oidc/userinfo", get(oidc::userinfo))
        .route("/oidc/revoke", post(oidc::revoke))
        .route("/oidc/end_session", get(oidc::end_session))
        .with_state(resources)
}
