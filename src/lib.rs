// ABOUTME: Library root for the aegis-idp authorization server
// ABOUTME: Module declarations and crate-level documentation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! # Aegis IdP
//!
//! Single-node OpenID Connect / OAuth2 authorization server core:
//! authorization-code, implicit, and hybrid flows, PKCE, consent with
//! incremental grants, refresh token rotation, and JWT signing with rotating
//! RSA keys published over JWKS.
//!
//! Users and clients are consumed from the database; registering and managing
//! them is an external concern. The HTTP surface is the OIDC protocol itself:
//! discovery, JWKS, authorize, consent, token, userinfo, revocation, and
//! end-session.

/// Access-token revocation blacklist (redis or in-memory)
pub mod blacklist;
/// Environment-driven server configuration
pub mod config;
/// Consent ledger with union-on-approval semantics
pub mod consent;
/// Opaque credential issuance: authorization codes and refresh tokens
pub mod credentials;
/// Database pool, migrations, and per-domain operations
pub mod database;
/// Unified application error handling
pub mod errors;
/// Authorization flow engine and token endpoint grants
pub mod flow;
/// Signing key lifecycle and JWKS rendering
pub mod keys;
/// Structured logging setup
pub mod logging;
/// Persisted domain models
pub mod models;
/// HTTP route handlers
pub mod routes;
/// Shared state and router assembly
pub mod server;
/// JWT issuance: access tokens and ID tokens
pub mod tokens;
