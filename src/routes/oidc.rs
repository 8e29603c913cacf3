// ABOUTME: axum handlers for the OIDC protocol surface
// ABOUTME: discovery, jwks, authorize, consent, token, userinfo, revoke, end_session
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

use crate::errors::{AppError, AppResult};
use crate::flow::{AuthorizeOutcome, AuthorizeRequest, ProtocolError, TokenRequest};
use crate::models::User;
use crate::server::ServerResources;
use axum::{
    extract::{Query, RawQuery, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Extract the Bearer token from the Authorization header
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Extract client credentials from a Basic Authorization header
fn extract_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Resolve the session user from a Bearer access token, if one is presented
/// and valid. Invalid or revoked tokens count as no session.
async fn session_user(
    resources: &ServerResources,
    headers: &HeaderMap,
) -> AppResult<Option<User>> {
    let Some(token) = extract_bearer(headers) else {
        return Ok(None);
    };
    if resources.credentials.is_access_token_revoked(token).await? {
        return Ok(None);
    }
    let Ok(claims) = resources.issuer.verify_access_token(token).await else {
        return Ok(None);
    };
    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return Ok(None);
    };
    resources.database.get_user(user_id).await
}

/// Resolve the session user or fail with an auth error (userinfo)
async fn require_user(resources: &ServerResources, headers: &HeaderMap) -> AppResult<User> {
    let token = extract_bearer(headers).ok_or_else(AppError::auth_required)?;
    if resources.credentials.is_access_token_revoked(token).await? {
        return Err(AppError::auth_invalid("Token has been revoked"));
    }
    let claims = resources.issuer.verify_access_token(token).await?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::auth_invalid("Token subject is not a user"))?;
    resources
        .database
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::auth_invalid("Unknown user"))
}

fn protocol_error_response(error: &ProtocolError) -> Response {
    let status = http::StatusCode::from_u16(error.http_status())
        .unwrap_or(http::StatusCode::BAD_REQUEST);
    (status, Json(error.clone())).into_response()
}

/// Map an authorize-walk outcome onto an HTTP response
fn authorize_outcome_response(outcome: AuthorizeOutcome, raw_query: Option<&str>) -> Response {
    match outcome {
        AuthorizeOutcome::DirectError(error) => protocol_error_response(&error),
        AuthorizeOutcome::Redirect(url) => Redirect::to(&url).into_response(),
        AuthorizeOutcome::LoginRequired => {
            let return_to = format!(
                "/oidc/authorize?{}",
                raw_query.unwrap_or_default()
            );
            let login = format!("/auth/login?return_to={}", urlencoding::encode(&return_to));
            Redirect::to(&login).into_response()
        }
        AuthorizeOutcome::ConsentRequired { .. } => {
            let consent = format!("/oidc/consent?{}", raw_query.unwrap_or_default());
            Redirect::to(&consent).into_response()
        }
    }
}

/// GET /.well-known/openid-configuration
pub async fn discovery(State(resources): State<Arc<ServerResources>>) -> Response {
    let issuer = resources.config.oidc.issuer();
    let base = issuer.trim_end_matches('/');

    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{base}/oidc/authorize"),
        "token_endpoint": format!("{base}/oidc/token"),
        "userinfo_endpoint": format!("{base}/oidc/userinfo"),
        "jwks_uri": format!("{base}/oidc/jwks"),
        "revocation_endpoint": format!("{base}/oidc/revoke"),
        "end_session_endpoint": format!("{base}/oidc/end_session"),
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
        "response_types_supported": [
            "code", "token", "id_token",
            "code token", "code id_token", "token id_token",
            "code token id_token"
        ],
        "grant_types_supported": [
            "authorization_code", "refresh_token", "client_credentials", "implicit"
        ],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256", "HS256"],
        "token_endpoint_auth_methods_supported": [
            "client_secret_basic", "client_secret_post", "none"
        ],
        "code_challenge_methods_supported": ["plain", "S256"],
        "claims_supported": [
            "iss", "sub", "aud", "exp", "iat", "auth_time", "nonce",
            "name", "preferred_username", "email", "email_verified"
        ]
    }))
    .into_response()
}

/// GET /oidc/jwks
pub async fn jwks(
    State(resources): State<Arc<ServerResources>>,
) -> Result<Response, AppError> {
    let jwks = resources.key_manager.jwks().await?;
    Ok(Json(jwks).into_response())
}

/// GET /oidc/authorize
pub async fn authorize(
    State(resources): State<Arc<ServerResources>>,
    RawQuery(raw_query): RawQuery,
    Query(request): Query<AuthorizeRequest>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user = session_user(&resources, &headers).await?;
    let outcome = resources.flow.authorize(&request, user.as_ref()).await?;
    Ok(authorize_outcome_response(outcome, raw_query.as_deref()))
}

/// GET /oidc/consent — render the consent page for the pending request
pub async fn consent_page(
    State(resources): State<Arc<ServerResources>>,
    RawQuery(raw_query): RawQuery,
    Query(request): Query<AuthorizeRequest>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(user) = session_user(&resources, &headers).await? else {
        let return_to = format!("/oidc/consent?{}", raw_query.unwrap_or_default());
        let login = format!("/auth/login?return_to={}", urlencoding::encode(&return_to));
        return Ok(Redirect::to(&login).into_response());
    };

    // Re-run the walk so a stale or already-consented request short-circuits
    let outcome = resources.flow.authorize(&request, Some(&user)).await?;
    match outcome {
        AuthorizeOutcome::ConsentRequired { client, scopes } => {
            let page = render_consent_page(&client.title, &scopes, &request);
            Ok(Html(page).into_response())
        }
        other => Ok(authorize_outcome_response(other, raw_query.as_deref())),
    }
}

/// Consent form body: the replayed authorization parameters plus the decision
#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    #[serde(flatten)]
    pub request: AuthorizeRequest,
    pub decision: String,
}

/// POST /oidc/consent
pub async fn consent_submit(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Result<Response, AppError> {
    let Some(user) = session_user(&resources, &headers).await? else {
        return Err(AppError::auth_required());
    };

    let approved = form.decision == "approve";
    let outcome = resources
        .flow
        .consent_decision(&form.request, &user, approved)
        .await?;
    Ok(authorize_outcome_response(outcome, None))
}

/// POST /oidc/token
pub async fn token(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Result<Response, AppError> {
    let basic = extract_basic(&headers);
    match resources.flow.token(&request, basic).await? {
        Ok(response) => Ok(Json(response).into_response()),
        Err(error) => Ok(protocol_error_response(&error)),
    }
}

/// GET /oidc/userinfo
pub async fn userinfo(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user = require_user(&resources, &headers).await?;

    let mut claims = json!({
        "sub": user.id.to_string(),
        "preferred_username": user.username,
        "email": user.email,
        "email_verified": user.is_verified,
    });
    if let Some(full_name) = &user.full_name {
        claims["name"] = json!(full_name);
    }

    Ok(Json(claims).into_response())
}

/// Revocation form body
#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    pub token: String,
    pub token_type_hint: Option<String>,
}

/// POST /oidc/revoke — always reports success (RFC 7009)
pub async fn revoke(
    State(resources): State<Arc<ServerResources>>,
    Form(form): Form<RevokeForm>,
) -> Result<Response, AppError> {
    resources
        .flow
        .revoke(&form.token, form.token_type_hint.as_deref())
        .await?;
    Ok(Json(json!({})).into_response())
}

/// end_session query parameters
#[derive(Debug, Deserialize)]
pub struct EndSessionQuery {
    pub id_token_hint: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub state: Option<String>,
}

/// GET /oidc/end_session
pub async fn end_session(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<EndSessionQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    // The session bearer token wins; the hint is a fallback for user agents
    // that no longer hold one
    let user = match session_user(&resources, &headers).await? {
        Some(user) => Some(user),
        None => match &query.id_token_hint {
            Some(hint) => hint_user(&resources, hint).await?,
            None => None,
        },
    };

    if let Some(user) = user {
        resources.flow.end_session(user.id).await?;
    } else {
        debug!("end_session without a resolvable user; nothing to revoke");
    }

    if let Some(uri) = &query.post_logout_redirect_uri {
        let target = match &query.state {
            Some(state) => {
                let sep = if uri.contains('?') { '&' } else { '?' };
                format!("{uri}{sep}state={}", urlencoding::encode(state))
            }
            None => uri.clone(),
        };
        return Ok(Redirect::to(&target).into_response());
    }

    Ok(Html(
        "<!DOCTYPE html><html><head><title>Signed out</title></head>\
         <body><h1>You have been signed out.</h1></body></html>"
            .to_string(),
    )
    .into_response())
}

/// Resolve a user from an `id_token_hint`, ignoring verification failures
async fn hint_user(resources: &ServerResources, hint: &str) -> AppResult<Option<User>> {
    let Ok(claims) = resources.issuer.verify_access_token(hint).await else {
        return Ok(None);
    };
    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return Ok(None);
    };
    resources.database.get_user(user_id).await
}

fn scope_description(scope: &str) -> String {
    match scope {
        "openid" => "Sign you in with your account".to_string(),
        "profile" => "View your basic profile information".to_string(),
        "email" => "View your email address".to_string(),
        "offline_access" => "Keep access while you are away".to_string(),
        other => format!("Access: {other}"),
    }
}

fn hidden_field(name: &str, value: Option<&str>) -> String {
    value.map_or_else(String::new, |v| {
        format!(
            "<input type=\"hidden\" name=\"{name}\" value=\"{}\">",
            html_escape::encode_double_quoted_attribute(v)
        )
    })
}

/// Render the consent page HTML for the pending request
fn render_consent_page(
    client_title: &str,
    scopes: &std::collections::BTreeSet<String>,
    request: &AuthorizeRequest,
) -> String {
    let title = html_escape::encode_text(client_title);

    let scope_items = scopes
        .iter()
        .map(|scope| {
            format!(
                "<li>{}</li>",
                html_escape::encode_text(&scope_description(scope))
            )
        })
        .collect::<String>();

    let hidden_fields = [
        hidden_field("client_id", request.client_id.as_deref()),
        hidden_field("redirect_uri", request.redirect_uri.as_deref()),
        hidden_field("response_type", request.response_type.as_deref()),
        hidden_field("scope", request.scope.as_deref()),
        hidden_field("state", request.state.as_deref()),
        hidden_field("nonce", request.nonce.as_deref()),
        hidden_field("code_challenge", request.code_challenge.as_deref()),
        hidden_field(
            "code_challenge_method",
            request.code_challenge_method.as_deref(),
        ),
    ]
    .concat();

    format!(
        "<!DOCTYPE html><html><head><title>Authorize {title}</title></head><body>\
         <h1>{title} is requesting access</h1>\
         <ul>{scope_items}</ul>\
         <form method=\"post\" action=\"/oidc/consent\">{hidden_fields}\
         <button type=\"submit\" name=\"decision\" value=\"approve\">Allow</button>\
         <button type=\"submit\" name=\"decision\" value=\"deny\">Deny</button>\
         </form></body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_basic_decodes_credentials() {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("client-id:s3cret");
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Basic {encoded}").parse().unwrap(),
        );
        assert_eq!(
            extract_basic(&headers),
            Some(("client-id".to_string(), "s3cret".to_string()))
        );
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, "Bearer tok".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("tok"));

        let empty = HeaderMap::new();
        assert_eq!(extract_bearer(&empty), None);
    }

    #[test]
    fn test_consent_page_escapes_client_title() {
        let request = AuthorizeRequest {
            client_id: Some("abc".into()),
            scope: Some("openid".into()),
            ..AuthorizeRequest::default()
        };
        let scopes = ["openid".to_string()].into_iter().collect();
        let page = render_consent_page("<script>alert(1)</script>", &scopes, &request);
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
