// ABOUTME: Shared test fixtures: in-memory resources, seeded users and clients
// ABOUTME: Every integration test builds on these helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(dead_code)]

use aegis_idp::blacklist::{MemoryBlacklist, TokenBlacklist};
use aegis_idp::config::{DatabaseUrl, Environment, LogLevel, OidcConfig, ServerConfig, TokenTtlConfig};
use aegis_idp::database::Database;
use aegis_idp::models::{Client, ClientType, User};
use aegis_idp::server::ServerResources;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

pub const CLIENT_SECRET: &str = "s3cret-value";
pub const REDIRECT_URI: &str = "https://app.test/cb";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 8080,
        environment: Environment::Testing,
        log_level: LogLevel::Info,
        database_url: DatabaseUrl::Memory,
        redis_url: None,
        oidc: OidcConfig {
            issuer_url: "https://idp.test".into(),
            jwt_secret: "test-jwt-secret".into(),
            ttl: TokenTtlConfig::default(),
        },
    }
}

pub async fn test_resources() -> Arc<ServerResources> {
    let database = Database::new_in_memory().await.unwrap();
    let blacklist: Arc<dyn TokenBlacklist> = Arc::new(MemoryBlacklist::new());
    Arc::new(ServerResources::new(database, blacklist, test_config()))
}

pub async fn seed_user(database: &Database) -> User {
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", Uuid::new_v4()),
        username: format!("user-{}", Uuid::new_v4()),
        hashed_password: "$2b$12$not-a-real-hash".into(),
        full_name: Some("Test User".into()),
        is_active: true,
        is_verified: true,
        created_at: Utc::now(),
    };
    database.create_user(&user).await.unwrap();
    user
}

fn scope_set(scopes: &[&str]) -> BTreeSet<String> {
    scopes.iter().map(ToString::to_string).collect()
}

/// A permissive confidential client covering every flow the tests exercise
pub fn client_template() -> Client {
    Client {
        id: Uuid::new_v4(),
        title: "Test App".into(),
        description: None,
        client_secret: CLIENT_SECRET.into(),
        client_type: ClientType::Confidential,
        redirect_uris: vec![REDIRECT_URI.into()],
        allowed_scopes: scope_set(&["openid", "profile", "email", "offline_access"]),
        response_types: scope_set(&[
            "code",
            "token",
            "id_token",
            "code token",
            "code id_token",
            "token id_token",
            "code token id_token",
        ]),
        grant_types: scope_set(&["authorization_code", "refresh_token", "client_credentials"]),
        token_endpoint_auth_method: "client_secret_basic".into(),
        id_token_signed_response_alg: "RS256".into(),
        require_pkce: false,
        allow_offline_access: true,
        access_token_timeout: 3600,
        refresh_token_timeout: 86400,
        created_at: Utc::now(),
    }
}

pub async fn seed_client(database: &Database) -> Client {
    let client = client_template();
    database.create_client(&client).await.unwrap();
    client
}

pub async fn seed_client_with(database: &Database, build: impl FnOnce(&mut Client)) -> Client {
    let mut client = client_template();
    build(&mut client);
    database.create_client(&client).await.unwrap();
    client
}

/// Issue a Bearer access token for the user with the current signing setup
pub async fn bearer_for(resources: &ServerResources, user: &User) -> String {
    resources
        .issuer
        .issue_access_token(&user.id.to_string(), 3600)
        .await
        .unwrap()
}
