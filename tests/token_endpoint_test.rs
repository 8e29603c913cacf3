// ABOUTME: Token endpoint tests: client auth, grant branches, PKCE, scope rules
// ABOUTME: Plus router-level HTTP tests over the assembled axum app
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use aegis_idp::flow::TokenRequest;
use aegis_idp::models::{Client, ClientType, CodeChallengeMethod, User};
use aegis_idp::server::{router, ServerResources};
use axum::body::Body;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use http::{header, Request, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower::ServiceExt;

fn scope_set(scopes: &[&str]) -> BTreeSet<String> {
    scopes.iter().map(ToString::to_string).collect()
}

async fn issue_code(
    resources: &ServerResources,
    client: &Client,
    user: &User,
    scope: &str,
    challenge: Option<(&str, CodeChallengeMethod)>,
) -> String {
    resources
        .credentials
        .issue_auth_code(aegis_idp::credentials::AuthCodeParams {
            client_id: client.id,
            user_id: user.id,
            redirect_uri: common::REDIRECT_URI.into(),
            scope: scope.into(),
            nonce: None,
            auth_time: chrono::Utc::now(),
            code_challenge: challenge.map(|(c, _)| c.to_string()),
            code_challenge_method: challenge.map(|(_, m)| m),
            claims: None,
            ttl_secs: 600,
        })
        .await
        .unwrap()
        .code
}

fn exchange_request(client: &Client, code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".into()),
        code: Some(code.into()),
        redirect_uri: Some(common::REDIRECT_URI.into()),
        client_id: Some(client.id.to_string()),
        client_secret: Some(common::CLIENT_SECRET.into()),
        ..TokenRequest::default()
    }
}

/// A wrong client secret fails with invalid_client before any grant work
#[tokio::test]
async fn test_confidential_client_auth_enforced() {
    let resources = common::test_resources().await;
    let client = common::seed_client(&resources.database).await;

    let request = TokenRequest {
        grant_type: Some("client_credentials".into()),
        client_id: Some(client.id.to_string()),
        client_secret: Some("wrong".into()),
        ..TokenRequest::default()
    };
    let error = resources.flow.token(&request, None).await.unwrap().unwrap_err();
    assert_eq!(error.error, "invalid_client");
    assert_eq!(error.http_status(), 401);
}

/// Public clients with auth method none skip the secret check
#[tokio::test]
async fn test_public_client_no_secret_required() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client_with(&resources.database, |c| {
        c.client_type = ClientType::Public;
        c.token_endpoint_auth_method = "none".into();
    })
    .await;

    let code = issue_code(&resources, &client, &user, "openid", None).await;
    let request = TokenRequest {
        grant_type: Some("authorization_code".into()),
        code: Some(code),
        redirect_uri: Some(common::REDIRECT_URI.into()),
        client_id: Some(client.id.to_string()),
        ..TokenRequest::default()
    };
    let response = resources.flow.token(&request, None).await.unwrap().unwrap();
    assert!(!response.access_token.is_empty());
}

/// Unknown grant types answer unsupported_grant_type
#[tokio::test]
async fn test_unknown_grant_type() {
    let resources = common::test_resources().await;
    let client = common::seed_client(&resources.database).await;

    let request = TokenRequest {
        grant_type: Some("password".into()),
        client_id: Some(client.id.to_string()),
        client_secret: Some(common::CLIENT_SECRET.into()),
        ..TokenRequest::default()
    };
    let error = resources.flow.token(&request, None).await.unwrap().unwrap_err();
    assert_eq!(error.error, "unsupported_grant_type");
}

/// PKCE S256: the right verifier passes, a wrong one burns the code
#[tokio::test]
async fn test_pkce_s256_verification() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(b"abc123"));

    // Wrong verifier
    let code = issue_code(
        &resources,
        &client,
        &user,
        "openid",
        Some((&challenge, CodeChallengeMethod::S256)),
    )
    .await;
    let mut request = exchange_request(&client, &code);
    request.code_verifier = Some("abc124".into());
    let error = resources.flow.token(&request, None).await.unwrap().unwrap_err();
    assert_eq!(error.error, "invalid_grant");

    // Fresh code, right verifier
    let code = issue_code(
        &resources,
        &client,
        &user,
        "openid",
        Some((&challenge, CodeChallengeMethod::S256)),
    )
    .await;
    let mut request = exchange_request(&client, &code);
    request.code_verifier = Some("abc123".into());
    assert!(resources.flow.token(&request, None).await.unwrap().is_ok());
}

/// PKCE plain compares the verifier to the challenge verbatim
#[tokio::test]
async fn test_pkce_plain_verification() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    let code = issue_code(
        &resources,
        &client,
        &user,
        "openid",
        Some(("the-verifier", CodeChallengeMethod::Plain)),
    )
    .await;
    let mut request = exchange_request(&client, &code);
    request.code_verifier = Some("the-verifier".into());
    assert!(resources.flow.token(&request, None).await.unwrap().is_ok());

    // Missing verifier fails
    let code = issue_code(
        &resources,
        &client,
        &user,
        "openid",
        Some(("the-verifier", CodeChallengeMethod::Plain)),
    )
    .await;
    let request = exchange_request(&client, &code);
    let error = resources.flow.token(&request, None).await.unwrap().unwrap_err();
    assert_eq!(error.error, "invalid_grant");
}

/// Refresh tokens only come back for offline-capable clients and scopes
#[tokio::test]
async fn test_refresh_token_issuance_gating() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    // openid only: no refresh token
    let code = issue_code(&resources, &client, &user, "openid", None).await;
    let response = resources
        .flow
        .token(&exchange_request(&client, &code), None)
        .await
        .unwrap()
        .unwrap();
    assert!(response.refresh_token.is_none());

    // offline_access: refresh token issued
    let code = issue_code(&resources, &client, &user, "openid offline_access", None).await;
    let response = resources
        .flow
        .token(&exchange_request(&client, &code), None)
        .await
        .unwrap()
        .unwrap();
    assert!(response.refresh_token.is_some());

    // Client without offline access never gets one
    let gated = common::seed_client_with(&resources.database, |c| {
        c.allow_offline_access = false;
    })
    .await;
    let code = issue_code(&resources, &gated, &user, "openid offline_access", None).await;
    let response = resources
        .flow
        .token(&exchange_request(&gated, &code), None)
        .await
        .unwrap()
        .unwrap();
    assert!(response.refresh_token.is_none());
}

/// Refresh scope may narrow but never widen
#[tokio::test]
async fn test_refresh_scope_narrowing_only() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    let refresh = resources
        .credentials
        .issue_refresh_token(client.id, user.id, "openid profile", 86400)
        .await
        .unwrap();

    let base = TokenRequest {
        grant_type: Some("refresh_token".into()),
        refresh_token: Some(refresh.token.clone()),
        client_id: Some(client.id.to_string()),
        client_secret: Some(common::CLIENT_SECRET.into()),
        ..TokenRequest::default()
    };

    // Widening is an invalid_grant and the token survives
    let mut widen = base.clone();
    widen.scope = Some("openid profile email".into());
    let error = resources.flow.token(&widen, None).await.unwrap().unwrap_err();
    assert_eq!(error.error, "invalid_grant");

    // Narrowing succeeds; without offline_access the token is not rotated
    let mut narrow = base.clone();
    narrow.scope = Some("openid".into());
    let response = resources.flow.token(&narrow, None).await.unwrap().unwrap();
    assert_eq!(response.scope, "openid");
    assert!(response.refresh_token.is_none());

    // The original token is still live for another refresh
    let response = resources.flow.token(&base, None).await.unwrap().unwrap();
    assert_eq!(response.scope, "openid profile");
}

/// client_credentials: gated by grant_types, defaults to the full allowed set
#[tokio::test]
async fn test_client_credentials_grant() {
    let resources = common::test_resources().await;
    let client = common::seed_client(&resources.database).await;

    let base = TokenRequest {
        grant_type: Some("client_credentials".into()),
        client_id: Some(client.id.to_string()),
        client_secret: Some(common::CLIENT_SECRET.into()),
        ..TokenRequest::default()
    };

    // Unspecified scope falls back to everything the client may have
    let response = resources.flow.token(&base, None).await.unwrap().unwrap();
    assert_eq!(response.scope, "email offline_access openid profile");
    assert!(response.refresh_token.is_none());
    assert!(response.id_token.is_none());

    // Subset is honored; excess is invalid_scope
    let mut subset = base.clone();
    subset.scope = Some("email".into());
    let response = resources.flow.token(&subset, None).await.unwrap().unwrap();
    assert_eq!(response.scope, "email");

    let mut excess = base.clone();
    excess.scope = Some("admin".into());
    let error = resources.flow.token(&excess, None).await.unwrap().unwrap_err();
    assert_eq!(error.error, "invalid_scope");

    // A client without the grant is unauthorized
    let gated = common::seed_client_with(&resources.database, |c| {
        c.grant_types = scope_set(&["authorization_code"]);
    })
    .await;
    let mut denied = base;
    denied.client_id = Some(gated.id.to_string());
    let error = resources.flow.token(&denied, None).await.unwrap().unwrap_err();
    assert_eq!(error.error, "unauthorized_client");
}

/// Revocation accepts both kinds and always succeeds
#[tokio::test]
async fn test_revocation_heuristic() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;

    let refresh = resources
        .credentials
        .issue_refresh_token(client.id, user.id, "openid", 86400)
        .await
        .unwrap();

    // Long opaque value revokes the refresh token
    resources.flow.revoke(&refresh.token, None).await.unwrap();
    assert!(resources
        .credentials
        .get_valid_refresh_token(&refresh.token, client.id)
        .await
        .unwrap()
        .is_none());

    // A JWT lands on the blacklist
    let access = common::bearer_for(&resources, &user).await;
    resources.flow.revoke(&access, None).await.unwrap();
    assert!(resources
        .credentials
        .is_access_token_revoked(&access)
        .await
        .unwrap());

    // Unknown values still succeed
    resources.flow.revoke("bogus", Some("refresh_token")).await.unwrap();
}

// Router-level tests over the assembled app

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// The discovery document advertises the full protocol surface
#[tokio::test]
async fn test_discovery_document() {
    let resources = common::test_resources().await;
    let app = router(resources);

    let response = app
        .oneshot(
            Request::get("/.well-known/openid-configuration")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc = body_json(response).await;
    assert_eq!(doc["issuer"], "https://idp.test/");
    assert_eq!(
        doc["authorization_endpoint"],
        "https://idp.test/oidc/authorize"
    );
    assert_eq!(doc["token_endpoint"], "https://idp.test/oidc/token");
    assert_eq!(doc["jwks_uri"], "https://idp.test/oidc/jwks");
    assert_eq!(doc["response_types_supported"].as_array().unwrap().len(), 7);
    assert_eq!(
        doc["code_challenge_methods_supported"],
        serde_json::json!(["plain", "S256"])
    );
}

/// The token endpoint speaks form encoding and Basic client auth
#[tokio::test]
async fn test_token_endpoint_over_http() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let client = common::seed_client(&resources.database).await;
    let code = issue_code(&resources, &client, &user, "openid", None).await;
    let app = router(resources);

    let basic = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", client.id, common::CLIENT_SECRET));
    let body = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", common::REDIRECT_URI),
    ])
    .unwrap();

    let response = app
        .oneshot(
            Request::post("/oidc/token")
                .header(header::AUTHORIZATION, format!("Basic {basic}"))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["token_type"], "bearer");
    assert!(json["access_token"].as_str().is_some());
    assert_eq!(json["scope"], "openid");
    assert!(json["id_token"].as_str().is_some());
}

/// userinfo requires a live Bearer token and stops honoring revoked ones
#[tokio::test]
async fn test_userinfo_and_revocation_over_http() {
    let resources = common::test_resources().await;
    let user = common::seed_user(&resources.database).await;
    let token = common::bearer_for(&resources, &user).await;
    let app = router(resources.clone());

    let response = app
        .clone()
        .oneshot(
            Request::get("/oidc/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["sub"], user.id.to_string());
    assert_eq!(json["email"], user.email);

    // No token at all
    let response = app
        .clone()
        .oneshot(Request::get("/oidc/userinfo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Revoke over HTTP, then the token is refused
    let body = serde_urlencoded::to_string([
        ("token", token.as_str()),
        ("token_type_hint", "access_token"),
    ])
    .unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::post("/oidc/revoke")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get("/oidc/userinfo")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// authorize over HTTP: unauthenticated requests bounce to login
#[tokio::test]
async fn test_authorize_redirects_to_login_over_http() {
    let resources = common::test_resources().await;
    let client = common::seed_client(&resources.database).await;
    let app = router(resources);

    let uri = format!(
        "/oidc/authorize?client_id={}&redirect_uri={}&response_type=code&scope=openid",
        client.id,
        urlencoding::encode(common::REDIRECT_URI)
    );
    let response = app
        .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("/auth/login?return_to="));
}

/// JWKS endpoint serves the stored keys
#[tokio::test]
async fn test_jwks_over_http() {
    let resources = common::test_resources().await;
    resources.key_manager.bootstrap().await.unwrap();
    let app = router(resources);

    let response = app
        .oneshot(Request::get("/oidc/jwks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["keys"].as_array().unwrap().len(), 1);
    assert_eq!(json["keys"][0]["kty"], "RSA");
}
